//! Capability interface onto the host document.
//!
//! Any concrete page binding implements [`HostPage`]; the lifecycle and
//! interception logic never touch the page otherwise.

use std::fmt;

use anyhow::Result;

use crate::core::keys::{KeyPhase, KeyStroke};
use crate::io::config::{Locator, Pick};

/// Identifier of an installed capture-phase key listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Client-side navigation signals observed in the host document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    PushState,
    ReplaceState,
    PopState,
}

/// A keydown observed in the capture phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent<H> {
    pub stroke: KeyStroke,
    /// Element the event was dispatched to, if the host can name it.
    pub target: Option<H>,
}

impl<H> KeyEvent<H> {
    pub fn new(stroke: KeyStroke, target: Option<H>) -> Self {
        Self { stroke, target }
    }
}

pub trait HostPage {
    type Handle: Clone + PartialEq + fmt::Debug;

    /// Host name of the document (`chatgpt.com`, ...).
    fn host(&self) -> String;

    /// Install the document-level capture-phase keydown listener.
    fn add_capture_listener(&mut self) -> Result<ListenerId>;

    fn remove_capture_listener(&mut self, id: ListenerId) -> Result<()>;

    /// Query the document. `pick` chooses among several matches.
    fn select(&self, selector: &str, pick: Pick) -> Result<Option<Self::Handle>>;

    /// False once the element has been removed from the document.
    fn is_connected(&self, handle: &Self::Handle) -> bool;

    /// True if `node` is `container` or one of its descendants.
    fn contains(&self, container: &Self::Handle, node: &Self::Handle) -> bool;

    fn active_element(&self) -> Option<Self::Handle>;

    fn read_text(&self, handle: &Self::Handle) -> Result<String>;

    /// Replace the element's content so the host's own editor state observes it.
    fn write_text(&mut self, handle: &Self::Handle, text: &str) -> Result<()>;

    fn is_disabled(&self, handle: &Self::Handle) -> bool;

    fn click(&mut self, handle: &Self::Handle) -> Result<()>;

    fn dispatch_key(
        &mut self,
        handle: &Self::Handle,
        phase: KeyPhase,
        stroke: &KeyStroke,
    ) -> Result<()>;
}

/// First element matched by the ordered `locators`.
pub fn locate<P: HostPage>(page: &P, locators: &[Locator]) -> Result<Option<P::Handle>> {
    for locator in locators {
        if let Some(handle) = page.select(&locator.selector, locator.pick)? {
            return Ok(Some(handle));
        }
    }
    Ok(None)
}
