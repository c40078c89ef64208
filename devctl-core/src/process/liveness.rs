use std::fs;

/// Checks whether `pid` refers to a running process.
///
/// Signal 0 probes existence without delivering anything. `EPERM` means the
/// process exists but belongs to someone else. Zombies count as dead: they
/// have exited and only wait for their parent to reap them.
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    if is_zombie(pid) {
        return false;
    }
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Reads the state letter from `/proc/<pid>/stat`.
///
/// The command name sits in parentheses and may itself contain spaces or
/// parentheses, so the state is the first field after the last `)`.
pub fn is_zombie(pid: i32) -> bool {
    let stat = match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(s) => s,
        Err(_) => return false,
    };
    match stat.rfind(')') {
        Some(idx) => stat[idx + 1..].trim_start().starts_with('Z'),
        None => false,
    }
}
