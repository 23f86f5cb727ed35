//! Help table for the commands scripts can call.
//!
//! Kept beside the bindings: a command registered in `bindings.rs` gets an
//! entry here, and `help()` only ever reads this table.

/// One command, or a function of a command module.
#[derive(Debug)]
pub struct CommandDoc {
    pub name: &'static str,
    pub help: &'static str,
    pub usage: &'static str,
    pub subcommands: &'static [CommandDoc],
}

const fn command(name: &'static str, help: &'static str, usage: &'static str) -> CommandDoc {
    CommandDoc {
        name,
        help,
        usage,
        subcommands: &[],
    }
}

const fn module(
    name: &'static str,
    help: &'static str,
    usage: &'static str,
    subcommands: &'static [CommandDoc],
) -> CommandDoc {
    CommandDoc {
        name,
        help,
        usage,
        subcommands,
    }
}

/// Every command, in the order `help()` lists them.
pub static COMMANDS: &[CommandDoc] = &[
    command("route", "Define a route handler", "route(METHOD, PATTERN, BODY | Fn)"),
    command("routes", "List all defined routes", "routes()"),
    command("respond", "Write response body to client", "respond(?HANDLE,? BODY)"),
    command("status", "Set HTTP response status code", "status(?HANDLE,? CODE)"),
    command("header", "Set HTTP response header", "header(?HANDLE,? NAME, VALUE)"),
    command("flush", "Flush buffered output", "flush(?HANDLE?)"),
    command("param", "Get path parameter from URL", "param(NAME)"),
    command("query", "Get query string parameter", "query(NAME, ?DEFAULT?)"),
    module(
        "request",
        "Access request data",
        "request::FUNCTION(?ARG?)",
        &[
            command("method", "Get HTTP method", "request::method()"),
            command("path", "Get decoded request path", "request::path()"),
            command("body", "Get request body", "request::body()"),
            command("header", "Get request header", "request::header(NAME)"),
        ],
    ),
    module(
        "path",
        "File path manipulation utilities",
        "path::FUNCTION(?ARG, ...?)",
        &[
            command("join", "Join path elements", "path::join(PART, PART, ...)"),
            command("base", "Return last element of path", "path::base(PATH)"),
            command("dir", "Return directory portion of path", "path::dir(PATH)"),
            command("ext", "Return file extension", "path::ext(PATH)"),
            command("clean", "Return cleaned path", "path::clean(PATH)"),
            command("abs", "Return absolute path", "path::abs(PATH)"),
            command("exists", "Return true if path exists", "path::exists(PATH)"),
        ],
    ),
    module(
        "connection",
        "Manage held HTTP connections for streaming",
        "connection::FUNCTION(?ARG, ...?)",
        &[
            command(
                "hold",
                "Hold current response open for streaming",
                "connection::hold(?ALIAS?)",
            ),
            command("close", "Close a held connection", "connection::close(HANDLE)"),
            command("info", "Get connection info", "connection::info(HANDLE)"),
            command(
                "on_close",
                "Call a function when the client disconnects",
                "connection::on_close(HANDLE, NAME | Fn)",
            ),
        ],
    ),
    command("connections", "List all open connection handles", "connections()"),
    command("puts", "Print string to output", "puts(VALUE)"),
    command("shutdown", "Stop the server gracefully", "shutdown()"),
    command("help", "Show help for commands", "help(?COMMAND?, ?SUBCOMMAND?)"),
];

/// Look up a top-level command by name.
pub fn find(name: &str) -> Option<&'static CommandDoc> {
    COMMANDS.iter().find(|cmd| cmd.name == name)
}

impl CommandDoc {
    pub fn subcommand(&self, name: &str) -> Option<&'static CommandDoc> {
        self.subcommands.iter().find(|sub| sub.name == name)
    }

    /// `usage - help` lines, subcommands indented two spaces deeper.
    pub fn lines(&self, prefix: &str) -> Vec<String> {
        let mut lines = vec![format!("{prefix}{} - {}", self.usage, self.help)];
        let nested = format!("{prefix}  ");
        for sub in self.subcommands {
            lines.extend(sub.lines(&nested));
        }
        lines
    }
}
