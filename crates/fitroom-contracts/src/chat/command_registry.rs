#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "subject",
        action: "select_subject",
    },
    CommandSpec {
        command: "garment",
        action: "select_garment",
    },
    CommandSpec {
        command: "save",
        action: "save_result",
    },
];

pub(crate) const SLOT_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "clear",
    action: "clear_slot",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "generate",
        action: "generate",
    },
    CommandSpec {
        command: "try",
        action: "generate",
    },
    CommandSpec {
        command: "again",
        action: "try_again",
    },
    CommandSpec {
        command: "reset",
        action: "start_over",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/subject <path>",
    "/garment <path>",
    "/clear subject|garment",
    "/generate",
    "/again",
    "/reset",
    "/save [path]",
    "/status",
    "/help",
    "/quit",
];
