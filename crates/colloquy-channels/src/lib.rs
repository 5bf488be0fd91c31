pub mod console;
pub mod console_runtime;
pub mod directory;

pub use console::ConsoleTransport;
pub use console_runtime::{parse_line, run_console, ChannelError, ConsoleInput, ConsoleRuntime};
pub use directory::{HandleDirectory, InMemoryHandleDirectory};
