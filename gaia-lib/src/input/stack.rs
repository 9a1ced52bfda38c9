use crate::values::ObjId;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    User,
    Admin,
    Game,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedObjects {
    pub direct: Option<ObjId>,
    pub indirect: Option<ObjId>,
    pub preposition: Option<String>,
}

/// A successful recognition, ready for the binder.
#[derive(Clone, Debug, PartialEq)]
pub struct Recognition {
    pub mode: Mode,
    pub verb: String,
    /// Whitespace-split argument words, case preserved as typed.
    pub args: Vec<String>,
    /// Everything after the verb, as typed.
    pub argstr: String,
    pub raw: String,
    pub resolved: ResolvedObjects,
}

/// The ordered recognizer stack for a session's state.
pub fn stack_for(admin: bool, embodied: bool) -> Vec<Mode> {
    match (admin, embodied) {
        (false, false) => vec![Mode::User],
        (false, true) => vec![Mode::User, Mode::Game],
        (true, false) => vec![Mode::Admin, Mode::User],
        (true, true) => vec![Mode::Admin, Mode::User, Mode::Game],
    }
}
