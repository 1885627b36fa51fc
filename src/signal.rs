//! Parses the CLI's signal argument (`kill <id> <signum>`) into a `nix::Signal`.

use nix::sys::signal::Signal;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("{0} is not a valid signal")]
pub struct InvalidSignal(pub String);

/// Parses a signal given as a decimal number or a name (`"15"`, `"TERM"`, `"SIGTERM"`).
pub fn from_str(signal: &str) -> Result<Signal, InvalidSignal> {
    use Signal::*;
    Ok(match signal.to_ascii_uppercase().as_str() {
        "1" | "HUP" | "SIGHUP" => SIGHUP,
        "2" | "INT" | "SIGINT" => SIGINT,
        "3" | "QUIT" | "SIGQUIT" => SIGQUIT,
        "4" | "ILL" | "SIGILL" => SIGILL,
        "5" | "TRAP" | "SIGTRAP" => SIGTRAP,
        "6" | "ABRT" | "IOT" | "SIGABRT" | "SIGIOT" => SIGABRT,
        "7" | "BUS" | "SIGBUS" => SIGBUS,
        "8" | "FPE" | "SIGFPE" => SIGFPE,
        "9" | "KILL" | "SIGKILL" => SIGKILL,
        "10" | "USR1" | "SIGUSR1" => SIGUSR1,
        "11" | "SEGV" | "SIGSEGV" => SIGSEGV,
        "12" | "USR2" | "SIGUSR2" => SIGUSR2,
        "13" | "PIPE" | "SIGPIPE" => SIGPIPE,
        "14" | "ALRM" | "SIGALRM" => SIGALRM,
        "15" | "TERM" | "SIGTERM" => SIGTERM,
        "17" | "CHLD" | "SIGCHLD" => SIGCHLD,
        "18" | "CONT" | "SIGCONT" => SIGCONT,
        "19" | "STOP" | "SIGSTOP" => SIGSTOP,
        "20" | "TSTP" | "SIGTSTP" => SIGTSTP,
        "21" | "TTIN" | "SIGTTIN" => SIGTTIN,
        "22" | "TTOU" | "SIGTTOU" => SIGTTOU,
        "23" | "URG" | "SIGURG" => SIGURG,
        "24" | "XCPU" | "SIGXCPU" => SIGXCPU,
        "25" | "XFSZ" | "SIGXFSZ" => SIGXFSZ,
        "26" | "VTALRM" | "SIGVTALRM" => SIGVTALRM,
        "27" | "PROF" | "SIGPROF" => SIGPROF,
        "28" | "WINCH" | "SIGWINCH" => SIGWINCH,
        "29" | "IO" | "SIGIO" => SIGIO,
        "31" | "SYS" | "SIGSYS" => SIGSYS,
        _ => return Err(InvalidSignal(signal.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_and_named_signals() {
        assert_eq!(from_str("9").unwrap(), Signal::SIGKILL);
        assert_eq!(from_str("SIGKILL").unwrap(), Signal::SIGKILL);
        assert_eq!(from_str("term").unwrap(), Signal::SIGTERM);
    }

    #[test]
    fn rejects_garbage() {
        assert!(from_str("abc").is_err());
        assert!(from_str("99").is_err());
    }
}
