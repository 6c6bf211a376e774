//! Reference command dispatcher.
//!
//! A handful of in-process commands, enough to drive the executor end to
//! end. Anything else is reported as not found.

use std::fs::File;

use relay_shell::ast::Statement;
use serde_json::Value;

use crate::context::{self, StageContext};
use crate::control::ExecError;
use crate::host::CommandDispatcher;
use crate::stdio::copy_to_stream;

const CAT_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Default, Clone, Copy)]
pub struct Builtins;

impl Builtins {
    pub fn is_builtin(name: &str) -> bool {
        matches!(
            name,
            "echo" | "cat" | "true" | ":" | "false" | "exit" | "pwd" | "json" | "tty"
        )
    }
}

impl CommandDispatcher for Builtins {
    fn execute(
        &self,
        ctx: &mut StageContext<'_>,
        statement: &Statement,
    ) -> Result<Value, ExecError> {
        let Some(name) = statement.name() else {
            return Ok(Value::Null);
        };
        let args = &statement.tokens[1..];
        match name {
            "echo" => builtin_echo(ctx, args),
            "cat" => builtin_cat(ctx, args),
            "true" | ":" => Ok(Value::Null),
            "false" => {
                context::error(1);
                Ok(Value::Null)
            }
            "exit" => builtin_exit(ctx, args),
            "pwd" => Ok(Value::String(ctx.current_dir().display().to_string())),
            "json" => builtin_json(args),
            "tty" => builtin_tty(args),
            other => Err(ExecError::CommandNotFound(other.to_string())),
        }
    }
}

// -- echo -----------------------------------------------------------------

struct EchoOptions {
    newline: bool,
    escapes: bool,
}

/// Peel leading option words (`-n`, `-e`, `-E` and clusters like `-ne`) off
/// the arguments. The first word that is not one ends the options.
fn echo_options(args: &[String]) -> (EchoOptions, &[String]) {
    let mut options = EchoOptions {
        newline: true,
        escapes: false,
    };
    let mut rest = args;
    while let Some((word, tail)) = rest.split_first() {
        let letters = match word.strip_prefix('-') {
            Some(letters) if !letters.is_empty() => letters,
            _ => break,
        };
        if !letters.bytes().all(|b| matches!(b, b'n' | b'e' | b'E')) {
            break;
        }
        for letter in letters.bytes() {
            match letter {
                b'n' => options.newline = false,
                b'e' => options.escapes = true,
                _ => options.escapes = false,
            }
        }
        rest = tail;
    }
    (options, rest)
}

fn builtin_echo(ctx: &StageContext<'_>, args: &[String]) -> Result<Value, ExecError> {
    let (options, words) = echo_options(args);
    let body = words.join(" ");
    let (mut text, stop) = if options.escapes {
        interpret_echo_escapes(&body)
    } else {
        (body, false)
    };
    if options.newline && !stop {
        text.push('\n');
    }
    ctx.stdout().write_all(text.as_bytes())?;
    Ok(Value::Null)
}

/// Returns the text and whether `\c` cut it short.
fn interpret_echo_escapes(s: &str) -> (String, bool) {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('c') => return (out, true),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    (out, false)
}

// -- cat ------------------------------------------------------------------

fn builtin_cat(ctx: &StageContext<'_>, args: &[String]) -> Result<Value, ExecError> {
    let out = ctx.stdout();
    if args.is_empty() {
        copy_to_stream(&mut ctx.reader(), out, CAT_BUFFER_SIZE)?;
    }
    let cwd = ctx.current_dir();
    for arg in args {
        if arg == "-" {
            copy_to_stream(&mut ctx.reader(), out, CAT_BUFFER_SIZE)?;
            continue;
        }
        let path = cwd.join(arg);
        let mut file = File::open(&path).map_err(|source| ExecError::Open { path, source })?;
        copy_to_stream(&mut file, out, CAT_BUFFER_SIZE)?;
    }
    out.flush()?;
    Ok(Value::Null)
}

// -- exit -----------------------------------------------------------------

fn builtin_exit(ctx: &StageContext<'_>, args: &[String]) -> Result<Value, ExecError> {
    let code = match args.first() {
        None => 0,
        Some(arg) => arg
            .parse::<i32>()
            .map_err(|_| ExecError::Command(format!("exit: {arg}: numeric argument required")))?,
    };
    ctx.error(code);
    Ok(Value::Null)
}

// -- json -----------------------------------------------------------------

fn builtin_json(args: &[String]) -> Result<Value, ExecError> {
    let text = args.join(" ");
    serde_json::from_str(&text).map_err(|e| ExecError::Command(format!("json: {e}")))
}

// -- tty ------------------------------------------------------------------

fn builtin_tty(args: &[String]) -> Result<Value, ExecError> {
    let fd = match args.first() {
        None => 0,
        Some(arg) => arg
            .parse::<usize>()
            .map_err(|_| ExecError::Command(format!("tty: {arg}: bad file descriptor")))?,
    };
    Ok(Value::Bool(context::is_tty(fd)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CurrentStageGuard, StageHandle};
    use crate::multi::Stream;
    use crate::state::ShellState;
    use crate::stdio::StageIo;
    use crate::test_support::MemoryChannel;
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::Arc;

    struct Harness {
        state: ShellState,
        stdout: Arc<MemoryChannel>,
        handle: Arc<StageHandle>,
        stdin: &'static [u8],
    }

    impl Harness {
        fn new(cwd: PathBuf) -> Self {
            Harness {
                state: ShellState::with_std_terminals(cwd),
                stdout: MemoryChannel::writer(),
                handle: Arc::new(StageHandle::new(vec![false, true, false])),
                stdin: b"",
            }
        }

        fn run(&self, words: &[&str]) -> Result<Value, ExecError> {
            let io = StageIo {
                stdin: Stream::Single(MemoryChannel::reader(self.stdin)),
                stdout: Stream::Single(self.stdout.clone()),
                stderr: Stream::Single(MemoryChannel::writer()),
            };
            let _guard = CurrentStageGuard::enter(self.handle.clone());
            let mut ctx = StageContext::new(&self.state, io, self.handle.clone());
            Builtins.execute(&mut ctx, &Statement::command(words))
        }

        fn output(&self) -> String {
            String::from_utf8(self.stdout.contents()).unwrap()
        }
    }

    #[test]
    fn echo_basic() {
        let h = Harness::new(PathBuf::from("/"));
        assert_eq!(h.run(&["echo", "hello", "world"]).unwrap(), Value::Null);
        assert_eq!(h.output(), "hello world\n");
    }

    #[test]
    fn echo_flags() {
        let h = Harness::new(PathBuf::from("/"));
        h.run(&["echo", "-n", "hi"]).unwrap();
        h.run(&["echo", "-e", "a\\tb\\c", "ignored"]).unwrap();
        h.run(&["echo", "-x"]).unwrap();
        assert_eq!(h.output(), "hia\tb-x\n");
    }

    #[test]
    fn echo_options_stop_at_first_word() {
        let h = Harness::new(PathBuf::from("/"));
        h.run(&["echo", "-ne", "x\\ty", "-n"]).unwrap();
        h.run(&["echo", "-eE", "a\\tb"]).unwrap();
        h.run(&["echo", "-", "--"]).unwrap();
        assert_eq!(h.output(), "x\ty -na\\tb\n- --\n");
    }

    #[test]
    fn cat_copies_stdin_and_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "file\n").unwrap();
        let mut h = Harness::new(dir.path().to_path_buf());
        h.stdin = b"piped\n";
        h.run(&["cat", "f.txt", "-"]).unwrap();
        assert_eq!(h.output(), "file\npiped\n");

        let err = h.run(&["cat", "missing.txt"]).unwrap_err();
        assert!(matches!(err, ExecError::Open { .. }));
    }

    #[test]
    fn false_records_status() {
        let h = Harness::new(PathBuf::from("/"));
        assert_eq!(h.run(&["false"]).unwrap(), Value::Null);
        assert_eq!(h.handle.error(), 1);
    }

    #[test]
    fn exit_records_status_or_rejects_garbage() {
        let h = Harness::new(PathBuf::from("/"));
        h.run(&["exit", "7"]).unwrap();
        assert_eq!(h.handle.error(), 7);
        let err = h.run(&["exit", "seven"]).unwrap_err();
        assert_eq!(err.to_string(), "exit: seven: numeric argument required");
    }

    #[test]
    fn pwd_and_json_return_values() {
        let h = Harness::new(PathBuf::from("/srv"));
        assert_eq!(h.run(&["pwd"]).unwrap(), json!("/srv"));
        assert_eq!(
            h.run(&["json", r#"{"n":"#, "1}"]).unwrap(),
            json!({"n": 1})
        );
        assert!(h.run(&["json", "{"]).is_err());
        assert!(h.output().is_empty());
    }

    #[test]
    fn tty_reports_inherited_descriptors() {
        let h = Harness::new(PathBuf::from("/"));
        assert_eq!(h.run(&["tty"]).unwrap(), json!(true));
        assert_eq!(h.run(&["tty", "1"]).unwrap(), json!(false));
        assert_eq!(h.run(&["tty", "9"]).unwrap(), json!(false));
    }

    #[test]
    fn unknown_command() {
        let h = Harness::new(PathBuf::from("/"));
        let err = h.run(&["frobnicate"]).unwrap_err();
        assert_eq!(err.kind(), "CommandNotFound");
        assert_eq!(err.to_string(), "frobnicate: command not found");
        assert!(!Builtins::is_builtin("frobnicate"));
        assert!(Builtins::is_builtin("cat"));
    }
}
