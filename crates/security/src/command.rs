//! Shell command policy for `run_command`.
//!
//! A command line is split into simple commands at `;`, `&&`, `||`, `|`
//! and newlines. Each blocked entry is a program name optionally followed
//! by flags or arguments (`rm -rf`, `chmod 777`). An entry matches a simple
//! command when the program names agree, every short flag letter of the
//! entry appears among the command's flags, and every other entry argument
//! appears verbatim. So `rm -rf` also blocks `rm -fr x` and `rm -r -f x`,
//! while `cat sudoers` is not mistaken for `sudo`.

/// Returned when a command hits the blocklist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("command '{command}' is blocked by policy entry '{entry}'")]
pub struct CommandPolicyError {
    pub command: String,
    pub entry: String,
}

#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    blocked: Vec<String>,
}

impl CommandPolicy {
    pub fn new(blocked: Vec<String>) -> Self {
        Self { blocked }
    }

    pub fn blocked(&self) -> &[String] {
        &self.blocked
    }

    pub fn check(&self, command: &str) -> Result<(), CommandPolicyError> {
        for segment in split_segments(command) {
            let tokens: Vec<&str> = segment.split_whitespace().collect();
            let Some(program) = program_index(&tokens) else {
                continue;
            };
            let command_tokens = &tokens[program..];
            if let Some(entry) = self.blocked.iter().find(|e| entry_matches(e, command_tokens)) {
                return Err(CommandPolicyError {
                    command: command.to_string(),
                    entry: entry.clone(),
                });
            }
        }
        Ok(())
    }
}

fn split_segments(command: &str) -> Vec<String> {
    let normalized = command
        .replace("&&", "\n")
        .replace("||", "\n")
        .replace([';', '|', '&', '(', ')', '`'], "\n")
        .replace("$(", "\n");
    normalized
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Skip leading `VAR=value` assignments.
fn program_index(tokens: &[&str]) -> Option<usize> {
    tokens.iter().position(|t| {
        let assignment = t.contains('=')
            && !t.starts_with('-')
            && t.split('=').next().is_some_and(|k| !k.is_empty());
        !assignment
    })
}

fn base_name(program: &str) -> &str {
    program.rsplit('/').next().unwrap_or(program)
}

fn entry_matches(entry: &str, tokens: &[&str]) -> bool {
    let mut entry_tokens = entry.split_whitespace();
    let Some(entry_program) = entry_tokens.next() else {
        return false;
    };
    let Some(program) = tokens.first() else {
        return false;
    };
    if base_name(program).to_ascii_lowercase() != entry_program.to_ascii_lowercase() {
        return false;
    }

    let command_flags: String = tokens[1..]
        .iter()
        .filter(|t| t.starts_with('-') && !t.starts_with("--"))
        .flat_map(|t| t.trim_start_matches('-').chars())
        .collect::<String>()
        .to_ascii_lowercase();

    entry_tokens.all(|want| {
        if want.starts_with('-') && !want.starts_with("--") {
            want.trim_start_matches('-')
                .chars()
                .all(|c| command_flags.contains(c.to_ascii_lowercase()))
        } else {
            tokens[1..].contains(&want)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CommandPolicy {
        CommandPolicy::new(
            ["sudo", "rm -rf", "chmod 777", "dd", "shutdown"]
                .into_iter()
                .map(String::from)
                .collect(),
        )
    }

    #[test]
    fn plain_commands_pass() {
        let p = policy();
        assert!(p.check("cargo test --all").is_ok());
        assert!(p.check("cat sudoers.txt").is_ok());
        assert!(p.check("rm -f build.log").is_ok());
        assert!(p.check("chmod 755 script.sh").is_ok());
        assert!(p.check("ls | grep dd").is_ok());
    }

    #[test]
    fn blocked_program_anywhere_in_pipeline() {
        let p = policy();
        assert!(p.check("sudo ls").is_err());
        assert!(p.check("echo hi && sudo reboot").is_err());
        assert!(p.check("ls; /usr/bin/sudo id").is_err());
        assert!(p.check("FOO=1 dd if=/dev/zero of=x").is_err());
        assert!(p.check("echo $(shutdown now)").is_err());
    }

    #[test]
    fn flag_sets_match_in_any_order() {
        let p = policy();
        assert!(p.check("rm -rf /").is_err());
        assert!(p.check("rm -fr dir").is_err());
        assert!(p.check("rm -r -f dir").is_err());
        assert!(p.check("rm -Rf dir").is_err());
        let err = p.check("chmod 777 file").unwrap_err();
        assert_eq!(err.entry, "chmod 777");
    }
}
