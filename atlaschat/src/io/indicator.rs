//! Cosmetic engagement indicator (icon + title).
//!
//! The badge is a pure function of `enabled`; the coordinator shows it once
//! per enablement write.

use tracing::info;

const ICON_SIZES: [u32; 4] = [16, 32, 48, 128];

/// Title and icon set for one enablement value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Badge {
    pub title: &'static str,
    /// `(size, path)` pairs.
    pub icons: Vec<(u32, String)>,
}

impl Badge {
    pub fn for_enabled(enabled: bool) -> Self {
        let (title, base) = if enabled {
            ("AtlasChat: ENGAGED", "icon-green")
        } else {
            ("AtlasChat: disengaged", "icon-grey")
        };
        let icons = ICON_SIZES
            .iter()
            .map(|size| (*size, format!("assets/{base}-{size}.png")))
            .collect();
        Self { title, icons }
    }
}

/// Sink for badge updates.
pub trait Indicator: Send {
    fn show(&self, badge: &Badge);
}

/// Indicator that reports badge changes through tracing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogIndicator;

impl Indicator for LogIndicator {
    fn show(&self, badge: &Badge) {
        info!(title = badge.title, icon = ?badge.icons.first(), "indicator updated");
    }
}
