use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, exit};

const TARGET: &str = "pipe-runner";

fn target_program() -> PathBuf {
    let sibling = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(TARGET)))
        .map(|path| path.with_extension(env::consts::EXE_EXTENSION));
    match sibling {
        Some(path) if path.is_file() => path,
        _ => PathBuf::from(TARGET),
    }
}

fn main() {
    let args: Vec<OsString> = env::args_os().skip(1).collect();

    match Command::new(target_program()).args(&args).status() {
        Ok(status) => exit(status.code().unwrap_or(1)),
        Err(err) => {
            eprintln!("Failed to invoke {TARGET}: {err}");
            exit(1);
        }
    }
}
