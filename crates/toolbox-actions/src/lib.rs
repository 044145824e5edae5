//! toolbox-actions - the procedure units gatekeeper serves
//!
//! Every `*_action` function under this crate annotated with
//! `#[toolbox::procedure]` becomes a tool named without the suffix. Adding a
//! tool means adding a module here; nothing else is registered by hand.

pub mod evaluation;
pub mod greeting;

/// Discovery namespace for the units in this crate.
pub const NAMESPACE: &str = module_path!();
