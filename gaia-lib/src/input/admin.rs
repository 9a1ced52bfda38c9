use crate::input::registry::Registry;
use crate::input::stack::{Mode, Recognition, ResolvedObjects};

/// Admin lines begin with `/`; the first whitespace-separated token is the
/// command, matched case-insensitively against the registered table; the
/// rest is the argument string.
pub fn recognize(registry: &Registry, line: &str) -> Option<Recognition> {
    let trimmed = line.trim();
    let rest = trimmed.strip_prefix('/')?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default().to_lowercase();
    if command.is_empty() || !registry.admin_commands().contains(&command) {
        return None;
    }
    let argstr = parts.next().unwrap_or_default().trim().to_string();
    Some(Recognition {
        mode: Mode::Admin,
        verb: command,
        args: argstr.split_whitespace().map(str::to_string).collect(),
        argstr,
        raw: line.to_string(),
        resolved: ResolvedObjects::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_slash_prefix() {
        let registry = Registry::with_defaults();
        assert!(recognize(&registry, "who").is_none());
        assert!(recognize(&registry, "/who").is_some());
    }

    #[test]
    fn test_case_insensitive_command_match() {
        let registry = Registry::with_defaults();
        let r = recognize(&registry, "/EVAL [+ 1 2]").unwrap();
        assert_eq!(r.verb, "eval");
        assert_eq!(r.argstr, "[+ 1 2]");
        assert_eq!(r.args, vec!["[+", "1", "2]"]);
    }

    #[test]
    fn test_unregistered_command_declines() {
        let registry = Registry::with_defaults();
        assert!(recognize(&registry, "/frobnicate now").is_none());
    }
}
