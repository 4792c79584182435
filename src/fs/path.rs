//! Drive-qualified paths and per-drive working directories.
//!
//! Canonical paths look like `"0:/docs/old/"`: one drive digit, a colon, a
//! leading separator, no `.`/`..`/empty components, and a trailing separator.

use crate::config::MAX_LOGICAL_DRIVES;
use crate::error::{Error, Result};
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

/// Split off a `"<digit>:"` prefix.
///
/// A prefix naming a drive outside `0..MAX_LOGICAL_DRIVES` is
/// `InvalidArgument`.
pub fn split_drive(input: &str) -> Result<(Option<usize>, &str)> {
    let bytes = input.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_digit() && bytes[1] == b':' {
        let drive = (bytes[0] - b'0') as usize;
        if drive >= MAX_LOGICAL_DRIVES {
            return Err(Error::InvalidArgument);
        }
        return Ok((Some(drive), &input[2..]));
    }
    Ok((None, input))
}

/// Join `input` onto the right working directory.
///
/// The result carries a drive prefix and a trailing separator but may still
/// contain `.` and `..`; see [`normalize`].
pub fn resolve(input: &str, cwds: &[String], current: usize, max_len: usize) -> Result<String> {
    let (drive, sub, absolute) = match split_drive(input)? {
        (Some(d), rest) => (d, rest, !rest.is_empty()),
        (None, rest) => (current, rest, rest.starts_with('/')),
    };
    let cwd = cwds.get(drive).ok_or(Error::InvalidArgument)?;
    if sub.is_empty() {
        return Ok(cwd.clone());
    }

    let mut out = if absolute { format!("{}:/", drive) } else { cwd.clone() };
    if !out.ends_with('/') {
        out.push('/');
    }
    out.push_str(sub.trim_start_matches('/'));
    if !out.ends_with('/') {
        out.push('/');
    }
    if out.len() > max_len {
        return Err(Error::InvalidPath);
    }
    Ok(out)
}

/// Collapse `.`, `..` and empty components. `..` at the root stays at the
/// root.
pub fn normalize(path: &str, max_len: usize) -> Result<String> {
    let (Some(drive), rest) = split_drive(path)? else {
        return Err(Error::InvalidPath);
    };

    let mut parts: Vec<&str> = Vec::new();
    for component in rest.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }

    let mut out = format!("{}:/", drive);
    for part in parts {
        out.push_str(part);
        out.push('/');
    }
    if out.len() > max_len {
        return Err(Error::InvalidPath);
    }
    Ok(out)
}

/// [`resolve`] followed by [`normalize`].
pub fn canonicalize(input: &str, cwds: &[String], current: usize, max_len: usize) -> Result<String> {
    normalize(&resolve(input, cwds, current, max_len)?, max_len)
}

/// Drive index and volume-relative path (`"/docs/old/"`) of a canonical path.
pub fn split_canonical(path: &str) -> Result<(usize, &str)> {
    match split_drive(path)? {
        (Some(drive), rest) if rest.starts_with('/') => Ok((drive, rest)),
        _ => Err(Error::InvalidPath),
    }
}

/// Canonical child path of directory `dir`.
pub fn join(dir: &str, name: &str) -> String {
    format!("{}{}/", dir, name)
}

/// A canonical path without its trailing separator, for display.
pub fn display(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some(p) if !p.ends_with(':') => p,
        _ => path,
    }
}
