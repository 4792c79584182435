use super::{shell_print, shell_println, Console};
use crate::arch::x86_64::io::PortIo;
use crate::error::Error;
use crate::fs::path;
use crate::fs::vfs::{DirEntry, Existence, FileType, PageControl};
use crate::fs::StorageManager;
use alloc::format;
use alloc::string::String;
use core::fmt::Write;

pub fn cmd_help(con: &mut dyn Console) {
    shell_println!(con, "Storage commands:");
    shell_println!(con, "  ls [dir]             list directory contents, a page at a time");
    shell_println!(con, "  lsr [dir]            list a directory tree");
    shell_println!(con, "  cd [dir]             change directory (and drive, with n:)");
    shell_println!(con, "  pwd                  print working directory");
    shell_println!(con, "  mkdir <dir>          create directory");
    shell_println!(con, "  new <file>           create empty file");
    shell_println!(con, "  open <file>          print file contents");
    shell_println!(con, "  append <file> <text> append a line of text");
    shell_println!(con, "  copy <src> <dst>     copy file, across drives too");
    shell_println!(con, "  rename <old> <new>   rename or move within a drive");
    shell_println!(con, "  del <path>           remove file or empty directory");
    shell_println!(con, "  exists <path>        tell whether a path exists");
    shell_println!(con, "  filesize <file>      print file size");
    shell_println!(con, "  du [drive]           disk usage");
    shell_println!(con, "  drives               list logical drives");
    shell_println!(con, "  format [drive]       erase drive with a new FAT filesystem");
}

/// Canonical display form of `arg`, or the argument itself if it does not
/// resolve.
fn shown<P: PortIo>(s: &StorageManager<P>, arg: &str) -> String {
    match s.canonicalize(arg) {
        Ok(c) => String::from(path::display(&c)),
        Err(_) => String::from(arg),
    }
}

fn print_entry(con: &mut dyn Console, entry: &DirEntry) {
    match entry.kind {
        FileType::Directory => shell_println!(con, "  {}  {:>10}  {}/", entry.modified, "<DIR>", entry.name),
        FileType::Regular => shell_println!(con, "  {}  {:>10}  {}", entry.modified, entry.size, entry.name),
    }
}

pub fn cmd_ls<P: PortIo>(s: &StorageManager<P>, dir: &str, con: &mut dyn Console) {
    let page_size = s.config().list_page_size;
    let listed = s.list_paged(dir, page_size, |page| {
        for entry in page {
            print_entry(con, entry);
        }
        if page.len() == page_size && !con.more() {
            return PageControl::Stop;
        }
        PageControl::Continue
    });

    match listed {
        Ok(n) => shell_println!(con, "{} entries", n),
        Err(e) => shell_println!(con, "ls: {}: {}", dir, e),
    }
}

pub fn cmd_lsr<P: PortIo>(s: &StorageManager<P>, dir: &str, con: &mut dyn Console) {
    let tree = match s.list_recursive(dir) {
        Ok(tree) => tree,
        Err(e) => {
            shell_println!(con, "lsr: {}: {}", dir, e);
            return;
        }
    };
    for node in &tree {
        for _ in 0..node.depth {
            shell_print!(con, "  ");
        }
        match node.kind {
            FileType::Directory => shell_println!(con, "{}/", node.path),
            FileType::Regular => shell_println!(con, "{} ({} bytes)", node.path, node.size),
        }
    }
}

pub fn cmd_mkdir<P: PortIo>(s: &StorageManager<P>, dir: &str, con: &mut dyn Console) {
    match s.mkdir(dir) {
        Ok(()) => shell_println!(con, "created directory {}", shown(s, dir)),
        Err(e) => shell_println!(con, "mkdir: {}: {}", dir, e),
    }
}

pub fn cmd_exists<P: PortIo>(s: &StorageManager<P>, p: &str, con: &mut dyn Console) {
    let what = match s.exists(p) {
        Ok(Existence::Directory) => "directory",
        Ok(Existence::File) => "file",
        Ok(Existence::None) => "not found",
        Err(e) => {
            shell_println!(con, "exists: {}: {}", p, e);
            return;
        }
    };
    shell_println!(con, "{}: {}", shown(s, p), what);
}

pub fn cmd_filesize<P: PortIo>(s: &StorageManager<P>, file: &str, con: &mut dyn Console) {
    match s.size_of(file) {
        Ok(n) => shell_println!(con, "{}: {} bytes", shown(s, file), n),
        Err(e) => shell_println!(con, "filesize: {}: {}", file, e),
    }
}

pub fn cmd_copy<P: PortIo>(s: &StorageManager<P>, src: &str, dst: &str, con: &mut dyn Console) {
    match s.copy(src, dst) {
        Ok(()) => shell_println!(con, "copied {} to {}", shown(s, src), shown(s, dst)),
        Err(e) => shell_println!(con, "copy: {} -> {}: {}", src, dst, e),
    }
}

pub fn cmd_append<P: PortIo>(s: &StorageManager<P>, file: &str, text: &str, con: &mut dyn Console) {
    let line = format!("{}\n", text);
    match s.append(file, line.as_bytes()) {
        Ok(()) => shell_println!(con, "appended {} bytes to {}", line.len(), shown(s, file)),
        Err(e) => shell_println!(con, "append: {}: {}", file, e),
    }
}

pub fn cmd_new<P: PortIo>(s: &StorageManager<P>, file: &str, con: &mut dyn Console) {
    match s.create(file) {
        Ok(()) => shell_println!(con, "created {}", shown(s, file)),
        Err(e) => shell_println!(con, "new: {}: {}", file, e),
    }
}

pub fn cmd_open<P: PortIo>(s: &StorageManager<P>, file: &str, con: &mut dyn Console) {
    match s.read_all(file) {
        Ok(data) => match core::str::from_utf8(&data) {
            Ok(text) => {
                shell_print!(con, "{}", text);
                if !text.is_empty() && !text.ends_with('\n') {
                    shell_println!(con);
                }
            }
            Err(_) => shell_println!(con, "{}: binary file, {} bytes", file, data.len()),
        },
        Err(e) => shell_println!(con, "open: {}: {}", file, e),
    }
}

pub fn cmd_del<P: PortIo>(s: &StorageManager<P>, p: &str, con: &mut dyn Console) {
    let target = shown(s, p);
    match s.delete(p) {
        Ok(()) => shell_println!(con, "deleted {}", target),
        Err(e) => shell_println!(con, "del: {}: {}", p, e),
    }
}

pub fn cmd_rename<P: PortIo>(s: &StorageManager<P>, old: &str, new: &str, con: &mut dyn Console) {
    let from = shown(s, old);
    match s.rename(old, new) {
        Ok(()) => shell_println!(con, "renamed {} to {}", from, shown(s, new)),
        Err(e) => shell_println!(con, "rename: {} -> {}: {}", old, new, e),
    }
}

pub fn cmd_format<P: PortIo>(s: &mut StorageManager<P>, drive: usize, con: &mut dyn Console) {
    let prompt = format!("Erase all data on {}: and format it? [y/N] ", drive);
    let confirmed = con.confirm(&prompt);
    match s.format(drive, confirmed) {
        Ok(fat_type) => shell_println!(con, "{}: formatted as {}", drive, fat_type.name()),
        Err(Error::NotConfirmed) => shell_println!(con, "format: cancelled"),
        Err(e) => shell_println!(con, "format: {}: {}", drive, e),
    }
}

pub fn cmd_cd<P: PortIo>(s: &mut StorageManager<P>, dir: &str, con: &mut dyn Console) {
    match s.change_directory(dir) {
        Ok(()) => shell_println!(con, "{}", s.current_dir()),
        Err(e) => shell_println!(con, "cd: {}: {}", dir, e),
    }
}

pub fn cmd_pwd<P: PortIo>(s: &StorageManager<P>, con: &mut dyn Console) {
    shell_println!(con, "{}", s.current_dir());
}

pub fn cmd_drives<P: PortIo>(s: &StorageManager<P>, con: &mut dyn Console) {
    let drives = s.drives();
    if drives.is_empty() {
        shell_println!(con, "No drives detected.");
        return;
    }
    for d in drives {
        shell_print!(
            con,
            "{}: {} {} {} [{} MiB] {}",
            d.logical,
            if d.channel == 0 { "primary" } else { "secondary" },
            if d.slave { "slave" } else { "master" },
            d.model,
            d.size_mb,
            d.fat_type.map_or("no filesystem", |t| t.name()),
        );
        if let Some(label) = d.label.as_deref().filter(|l| !l.is_empty()) {
            shell_print!(con, " \"{}\"", label);
        }
        match d.volume_serial {
            Some(id) => shell_println!(con, " {:04X}-{:04X}", id >> 16, id & 0xFFFF),
            None => shell_println!(con),
        }
    }
}

pub fn cmd_du<P: PortIo>(s: &StorageManager<P>, drive: usize, con: &mut dyn Console) {
    match s.disk_usage(drive) {
        Ok(u) => shell_println!(
            con,
            "{}: total {} KiB, used {} KiB, free {} KiB",
            drive,
            u.total_bytes / 1024,
            u.used_bytes() / 1024,
            u.free_bytes / 1024,
        ),
        Err(e) => shell_println!(con, "du: {}: {}", drive, e),
    }
}
