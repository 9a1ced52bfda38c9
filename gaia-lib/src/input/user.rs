use crate::input::registry::Registry;
use crate::input::stack::{Mode, Recognition, ResolvedObjects};

/// User lines start with a registered keyword (`WHO`, `QUIT`, `CONNECT`,
/// `COMMANDS`, ...), matched case-insensitively; arguments are preserved as
/// typed.
pub fn recognize(registry: &Registry, line: &str) -> Option<Recognition> {
    let trimmed = line.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let keyword = parts.next().unwrap_or_default().to_lowercase();
    if keyword.is_empty() || !registry.user_commands().contains(&keyword) {
        return None;
    }
    let argstr = parts.next().unwrap_or_default().trim().to_string();
    Some(Recognition {
        mode: Mode::User,
        verb: keyword,
        args: argstr.split_whitespace().map(str::to_string).collect(),
        argstr,
        raw: line.to_string(),
        resolved: ResolvedObjects::default(),
    })
}
