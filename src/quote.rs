//! Shell quoting and PATH composition for local and remote tmux invocations.
//!
//! Remote commands pass through the login shell of the target host, which
//! would otherwise mangle tmux format tokens like `#{session_name}`. The
//! whole command line is therefore single-quoted, base64-encoded, and
//! rehydrated on the far side with `base64 -d | sh`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// Merge PATH additions into a colon-separated path without duplicates.
///
/// Entries of `current` keep their relative order; `additions` are appended
/// in order, skipping anything already present.
pub fn build_path(current: &str, additions: &[String]) -> String {
    let mut seen = std::collections::HashSet::new();
    let mut parts: Vec<&str> = Vec::new();
    for part in current.split(':') {
        if part.is_empty() || !seen.insert(part) {
            continue;
        }
        parts.push(part);
    }
    for add in additions {
        if add.is_empty() || !seen.insert(add.as_str()) {
            continue;
        }
        parts.push(add);
    }
    parts.join(":")
}

/// Return a single-quoted shell literal for `s`.
///
/// Every embedded single quote becomes `'\''`; the empty string becomes
/// `''`. The result is one shell word under POSIX quoting rules.
pub fn sh_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Compose the `PATH=… exec '<bin>' '<arg>' …` line evaluated by the
/// remote shell. Local invocations never pass through here; they run the
/// argv directly.
pub fn exec_command(path: &str, bin: &str, args: &[String]) -> String {
    let mut quoted = Vec::with_capacity(args.len() + 1);
    quoted.push(sh_quote(bin));
    for arg in args {
        quoted.push(sh_quote(arg));
    }
    format!("PATH={} exec {}", path, quoted.join(" "))
}

/// Wrap a command line for transmission through a remote login shell.
///
/// The remote shell only ever sees a base64 literal, so tmux format tokens
/// survive untouched.
pub fn remote_command(command: &str) -> String {
    let b64 = BASE64.encode(command.as_bytes());
    format!("printf '%s' {} | base64 -d | sh", sh_quote(&b64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/bin:/usr/bin", &["/usr/bin", "/opt/bin"], "/bin:/usr/bin:/opt/bin")]
    #[case("", &["/opt/bin"], "/opt/bin")]
    #[case("/bin::/bin", &[], "/bin")]
    #[case("/a:/b", &["/b", "/a", "/c"], "/a:/b:/c")]
    fn build_path_dedupes_and_preserves_order(
        #[case] current: &str,
        #[case] additions: &[&str],
        #[case] expected: &str,
    ) {
        let adds: Vec<String> = additions.iter().map(|s| s.to_string()).collect();
        assert_eq!(build_path(current, &adds), expected);
    }

    #[test]
    fn build_path_skips_empty_entries() {
        let adds = vec![String::new(), "/x".to_string()];
        assert_eq!(build_path(":/bin:", &adds), "/bin:/x");
    }

    #[rstest]
    #[case("", "''")]
    #[case("plain", "'plain'")]
    #[case("with space", "'with space'")]
    #[case("it's", "'it'\\''s'")]
    #[case("#{session_name}", "'#{session_name}'")]
    #[case("a;b|c&d", "'a;b|c&d'")]
    fn sh_quote_produces_single_word(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sh_quote(input), expected);
    }

    #[rstest]
    #[case("plain")]
    #[case("with space")]
    #[case("it's got 'quotes'")]
    #[case("#{session_name}\t#{pane_id}")]
    #[case("a;b|c&d$(echo x)`echo y`")]
    #[case("")]
    fn sh_quote_round_trips_through_a_real_shell(#[case] input: &str) {
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(format!("printf '%s' {}", sh_quote(input)))
            .output()
            .expect("run sh");
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), input);
    }

    #[test]
    fn exec_command_quotes_every_argument() {
        let args = vec!["list-sessions".to_string(), "-F".to_string(), "#{session_name}".to_string()];
        let cmd = exec_command("/bin:/usr/bin", "tmux", &args);
        assert_eq!(
            cmd,
            "PATH=/bin:/usr/bin exec 'tmux' 'list-sessions' '-F' '#{session_name}'"
        );
    }

    #[test]
    fn remote_command_is_base64_wrapped() {
        let cmd = remote_command("PATH=/bin exec 'tmux' 'ls'");
        assert!(cmd.starts_with("printf '%s' '"));
        assert!(cmd.ends_with("' | base64 -d | sh"));
        // The payload itself must not leak format-sensitive bytes.
        let payload = cmd
            .strip_prefix("printf '%s' '")
            .and_then(|rest| rest.strip_suffix("' | base64 -d | sh"))
            .expect("payload");
        assert!(!payload.contains('#'));
        assert!(!payload.contains(' '));
        let decoded = BASE64.decode(payload).expect("valid base64");
        assert_eq!(decoded, b"PATH=/bin exec 'tmux' 'ls'");
    }

    #[test]
    fn remote_command_round_trips_format_tokens() {
        let args = vec!["-F".to_string(), "#{session_name}\t#{pane_id}".to_string()];
        let cmd = exec_command("/bin", "tmux", &args);
        let remote = remote_command(&cmd);
        let payload = remote
            .strip_prefix("printf '%s' '")
            .and_then(|rest| rest.strip_suffix("' | base64 -d | sh"))
            .expect("payload");
        let decoded = String::from_utf8(BASE64.decode(payload).expect("valid base64")).unwrap();
        assert!(decoded.contains("'#{session_name}\t#{pane_id}'"));
    }
}
