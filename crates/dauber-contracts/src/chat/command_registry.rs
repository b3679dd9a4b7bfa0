#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub arg_key: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "tone",
        action: "set_tone",
        arg_key: "level",
    },
    CommandSpec {
        command: "context",
        action: "set_context",
        arg_key: "text",
    },
    CommandSpec {
        command: "key",
        action: "set_key",
        arg_key: "key",
    },
];

pub(crate) const SINGLE_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "compare",
        action: "select_compare",
        arg_key: "frame",
    },
    CommandSpec {
        command: "camera",
        action: "switch_camera",
        arg_key: "device",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "nocompare",
        action: "clear_compare",
        arg_key: "",
    },
    CommandSpec {
        command: "frames",
        action: "list_frames",
        arg_key: "",
    },
    CommandSpec {
        command: "clear",
        action: "clear_frames",
        arg_key: "",
    },
    CommandSpec {
        command: "devices",
        action: "list_devices",
        arg_key: "",
    },
    CommandSpec {
        command: "nokey",
        action: "clear_key",
        arg_key: "",
    },
    CommandSpec {
        command: "status",
        action: "status",
        arg_key: "",
    },
    CommandSpec {
        command: "help",
        action: "help",
        arg_key: "",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
        arg_key: "",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
        arg_key: "",
    },
];

pub const STUDIO_HELP_COMMANDS: &[&str] = &[
    "<enter>",
    "/compare",
    "/nocompare",
    "/frames",
    "/clear",
    "/tone",
    "/context",
    "/devices",
    "/camera",
    "/key",
    "/nokey",
    "/status",
    "/help",
    "/quit",
];
