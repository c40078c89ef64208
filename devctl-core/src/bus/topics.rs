/// Domain events: state snapshots, pipeline progress, stream traffic.
pub const DOMAIN: &str = "devctl.events";
/// Domain events republished for the UI under `tui.` types.
pub const UI_MSGS: &str = "devctl.ui.msgs";
/// Requests posted by the UI: actions and stream start/stop.
pub const UI_ACTIONS: &str = "devctl.ui.actions";
