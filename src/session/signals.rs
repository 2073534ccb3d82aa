use std::sync::LazyLock;
use regex::Regex;
use super::log::{LogClass, LogEntry, RemoteStatus};
use super::state::SessionFlags;

static COMPLETED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(exploit|exploitation|session)\s+(completed|finished)\b").expect("static regex")
});

static FAILED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bexploit(ation)?\s+failed\b|\bsession\s+(died|terminated)\b").expect("static regex")
});

static ROOT_ACCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\buid=0\b|\broot\s+shell\b|nt authority\\system").expect("static regex")
});

static SHELL_OPENED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(command\s+shell|meterpreter)\s+session\s+\d+\s+opened\b|\bshell\s+opened\b").expect("static regex")
});

/// Terminal status implied by a single log entry, if any.
pub fn terminal_signal(entry: &LogEntry) -> Option<RemoteStatus> {
    match entry.class {
        LogClass::Success | LogClass::Exploit if COMPLETED.is_match(&entry.text) => Some(RemoteStatus::Completed),
        LogClass::Error if FAILED.is_match(&entry.text) => Some(RemoteStatus::Failed),
        _ => None,
    }
}

pub fn outcome_flags(entry: &LogEntry) -> SessionFlags {
    SessionFlags {
        root_access: ROOT_ACCESS.is_match(&entry.text),
        shell_opened: SHELL_OPENED.is_match(&entry.text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(class: LogClass, text: &str) -> LogEntry {
        LogEntry::new(0, class, text)
    }

    #[test]
    fn test_completion_requires_success_class() {
        assert_eq!(
            terminal_signal(&entry(LogClass::Success, "[+] Exploit completed")),
            Some(RemoteStatus::Completed)
        );
        assert_eq!(terminal_signal(&entry(LogClass::Info, "exploit completed")), None);
    }

    #[test]
    fn test_failure_signal() {
        assert_eq!(
            terminal_signal(&entry(LogClass::Error, "[-] Exploitation failed: target not vulnerable")),
            Some(RemoteStatus::Failed)
        );
        assert_eq!(
            terminal_signal(&entry(LogClass::Error, "Session died unexpectedly")),
            Some(RemoteStatus::Failed)
        );
        assert_eq!(terminal_signal(&entry(LogClass::Error, "connection reset, retrying")), None);
    }

    #[test]
    fn test_root_flag() {
        let flags = outcome_flags(&entry(LogClass::Info, "uid=0(root) gid=0(root) groups=0(root)"));
        assert!(flags.root_access);
        assert!(!flags.shell_opened);
        assert!(outcome_flags(&entry(LogClass::Success, r"NT AUTHORITY\SYSTEM")).root_access);
    }

    #[test]
    fn test_shell_flag() {
        let flags = outcome_flags(&entry(
            LogClass::Exploit,
            "[*] Command shell session 1 opened (10.0.0.2:4444 -> 10.0.0.5:49152)",
        ));
        assert!(flags.shell_opened);
        assert!(!outcome_flags(&entry(LogClass::Info, "uid=1000(ftp)")).root_access);
    }
}
