/// A command line is the decoded argument vector of a multibulk request: `cmdLine[0]`
/// is the command name, the rest are its arguments. Kept as owned byte vectors
/// because RESP bulk strings are binary-safe and need not be valid UTF-8.
pub type CmdLine = Vec<Vec<u8>>;

/// Build a command line out of plain strings, e.g. `cmd_line(&["select", "1"])`.
pub fn cmd_line(parts: &[&str]) -> CmdLine {
    parts.iter().map(|s| s.as_bytes().to_vec()).collect()
}

/// Build a command line from a name plus already-binary arguments, used by
/// executors to log the exact bytes they acted on to the AOF.
pub fn cmd_line_with_args(name: &str, args: &[Vec<u8>]) -> CmdLine {
    let mut out = Vec::with_capacity(args.len() + 1);
    out.push(name.as_bytes().to_vec());
    out.extend(args.iter().cloned());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_line_builds_byte_vectors() {
        let line = cmd_line(&["select", "1"]);
        assert_eq!(line, vec![b"select".to_vec(), b"1".to_vec()]);
    }

    #[test]
    fn cmd_line_with_args_prefixes_name() {
        let line = cmd_line_with_args("del", &[b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(line, vec![b"del".to_vec(), b"a".to_vec(), b"b".to_vec()]);
    }
}
