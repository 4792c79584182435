//! Storage commands for an interactive console.
//!
//! The line editor and the screen belong to the embedding kernel; it hands
//! each line to [`Shell::run_line`] together with a [`Console`].

mod builtins;

use crate::arch::x86_64::io::PortIo;
use crate::config::MAX_LOGICAL_DRIVES;
use crate::fs::StorageManager;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

/// Output sink plus the two interactive hooks commands need.
pub trait Console: fmt::Write {
    /// Ask a yes/no question.
    fn confirm(&mut self, prompt: &str) -> bool;
    /// Called after each full page of a listing. `false` stops it.
    fn more(&mut self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Ls(Option<&'a str>),
    Lsr(Option<&'a str>),
    Mkdir(&'a str),
    Exists(&'a str),
    FileSize(&'a str),
    Copy(&'a str, &'a str),
    Append(&'a str, String),
    New(&'a str),
    Open(&'a str),
    Del(&'a str),
    Rename(&'a str, &'a str),
    Format(Option<usize>),
    Cd(Option<&'a str>),
    Drives,
    Du(Option<usize>),
    Pwd,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Unknown(String),
    Usage(&'static str),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Unknown(cmd) => write!(f, "{}: command not found", cmd),
            ParseError::Usage(usage) => write!(f, "usage: {}", usage),
        }
    }
}

/// `"1"` or `"1:"` as a logical drive number.
fn parse_drive(arg: &str) -> Option<usize> {
    let digits = arg.strip_suffix(':').unwrap_or(arg);
    match digits.as_bytes() {
        [d] if d.is_ascii_digit() && ((d - b'0') as usize) < MAX_LOGICAL_DRIVES => Some((d - b'0') as usize),
        _ => None,
    }
}

impl<'a> Command<'a> {
    /// Build a command from a split argument vector. `None` for an empty line.
    pub fn parse(args: &'a [String]) -> Option<Result<Self, ParseError>> {
        let (cmd, rest) = args.split_first()?;
        Some(Self::from_parts(cmd, rest))
    }

    fn from_parts(cmd: &str, rest: &'a [String]) -> Result<Self, ParseError> {
        let arg = |i: usize| rest.get(i).map(String::as_str);
        let need = |i: usize, usage: &'static str| arg(i).ok_or(ParseError::Usage(usage));
        let drive = |usage: &'static str| match arg(0) {
            None => Ok(None),
            Some(a) => parse_drive(a).map(Some).ok_or(ParseError::Usage(usage)),
        };

        Ok(match cmd {
            "ls" => Command::Ls(arg(0)),
            "lsr" => Command::Lsr(arg(0)),
            "mkdir" => Command::Mkdir(need(0, "mkdir <dir>")?),
            "exists" => Command::Exists(need(0, "exists <path>")?),
            "filesize" => Command::FileSize(need(0, "filesize <file>")?),
            "copy" => Command::Copy(need(0, "copy <src> <dst>")?, need(1, "copy <src> <dst>")?),
            "append" => {
                if rest.len() < 2 {
                    return Err(ParseError::Usage("append <file> <text>"));
                }
                Command::Append(rest[0].as_str(), rest[1..].join(" "))
            }
            "new" => Command::New(need(0, "new <file>")?),
            "open" => Command::Open(need(0, "open <file>")?),
            "del" => Command::Del(need(0, "del <file>")?),
            "rename" => Command::Rename(need(0, "rename <old> <new>")?, need(1, "rename <old> <new>")?),
            "format" => Command::Format(drive("format [drive]")?),
            "cd" => Command::Cd(arg(0)),
            "drives" => Command::Drives,
            "du" => Command::Du(drive("du [drive]")?),
            "pwd" => Command::Pwd,
            "help" => Command::Help,
            other => return Err(ParseError::Unknown(String::from(other))),
        })
    }
}

/// Split a command line on blanks, keeping quoted runs together.
pub fn parse_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut quote_char = '"';

    for ch in line.chars() {
        match ch {
            '"' | '\'' if !in_quote => {
                in_quote = true;
                quote_char = ch;
            }
            c if in_quote && c == quote_char => {
                in_quote = false;
            }
            ' ' | '\t' if !in_quote => {
                if !current.is_empty() {
                    args.push(core::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if !current.is_empty() {
        args.push(current);
    }

    args
}

macro_rules! shell_print {
    ($con:expr, $($a:tt)*) => {{
        let _ = write!($con, $($a)*);
    }};
}

macro_rules! shell_println {
    ($con:expr) => {{
        let _ = writeln!($con);
    }};
    ($con:expr, $($a:tt)*) => {{
        let _ = writeln!($con, $($a)*);
    }};
}

pub(crate) use {shell_print, shell_println};

pub struct Shell<P: PortIo> {
    storage: StorageManager<P>,
}

impl<P: PortIo> Shell<P> {
    pub fn new(storage: StorageManager<P>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &StorageManager<P> {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut StorageManager<P> {
        &mut self.storage
    }

    pub fn prompt(&self) -> String {
        alloc::format!("{}> ", self.storage.current_dir())
    }

    /// Parse and run one line of input.
    pub fn run_line(&mut self, line: &str, con: &mut dyn Console) {
        use core::fmt::Write;

        let args = parse_args(line);
        match Command::parse(&args) {
            None => {}
            Some(Ok(cmd)) => self.execute(cmd, con),
            Some(Err(e)) => shell_println!(con, "{}", e),
        }
    }

    pub fn execute(&mut self, cmd: Command<'_>, con: &mut dyn Console) {
        let s = &mut self.storage;
        match cmd {
            Command::Ls(dir) => builtins::cmd_ls(s, dir.unwrap_or(""), con),
            Command::Lsr(dir) => builtins::cmd_lsr(s, dir.unwrap_or(""), con),
            Command::Mkdir(dir) => builtins::cmd_mkdir(s, dir, con),
            Command::Exists(path) => builtins::cmd_exists(s, path, con),
            Command::FileSize(file) => builtins::cmd_filesize(s, file, con),
            Command::Copy(src, dst) => builtins::cmd_copy(s, src, dst, con),
            Command::Append(file, text) => builtins::cmd_append(s, file, &text, con),
            Command::New(file) => builtins::cmd_new(s, file, con),
            Command::Open(file) => builtins::cmd_open(s, file, con),
            Command::Del(file) => builtins::cmd_del(s, file, con),
            Command::Rename(old, new) => builtins::cmd_rename(s, old, new, con),
            Command::Format(drive) => {
                let drive = drive.unwrap_or(s.current_drive());
                builtins::cmd_format(s, drive, con)
            }
            Command::Cd(dir) => builtins::cmd_cd(s, dir.unwrap_or("/"), con),
            Command::Drives => builtins::cmd_drives(s, con),
            Command::Du(drive) => {
                let drive = drive.unwrap_or(s.current_drive());
                builtins::cmd_du(s, drive, con)
            }
            Command::Pwd => builtins::cmd_pwd(s, con),
            Command::Help => builtins::cmd_help(con),
        }
    }
}
