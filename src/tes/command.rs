//! Rendering of executor commands with stdio redirections.
//!
//! Kubernetes containers have no native stdin/stdout/stderr redirection, so
//! an executor that asks for any of them runs under `/bin/sh -c` with the
//! redirections spelled out in shell syntax.

use super::TesExecutor;

/// The container command for an executor, with stdio redirections applied.
///
/// Executors without redirections keep their argv untouched. With at least
/// one of `stdin`/`stdout`/`stderr` set, the argv is single-quoted, joined
/// and handed to `/bin/sh -c` together with the redirection operators.
pub fn shell_wrapped_command(executor: &TesExecutor) -> Vec<String> {
    if executor.stdin.is_none() && executor.stdout.is_none() && executor.stderr.is_none() {
        return executor.command.clone();
    }

    let mut line = executor
        .command
        .iter()
        .map(|arg| single_quoted(arg))
        .collect::<Vec<_>>()
        .join(" ");
    if let Some(stdin) = &executor.stdin {
        line.push_str(" < ");
        line.push_str(&single_quoted(stdin));
    }
    if let Some(stdout) = &executor.stdout {
        line.push_str(" > ");
        line.push_str(&single_quoted(stdout));
    }
    if let Some(stderr) = &executor.stderr {
        line.push_str(" 2> ");
        line.push_str(&single_quoted(stderr));
    }

    vec!["/bin/sh".to_string(), "-c".to_string(), line]
}

/// POSIX single-quoting. A literal `'` cannot appear inside single quotes,
/// so it is rendered as `'\''` (close, escaped quote, reopen).
fn single_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}
