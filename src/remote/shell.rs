// ABOUTME: Shell quoting and privilege elevation for remote command strings.
// ABOUTME: Every path or value interpolated into a remote command passes through quote().

/// Quote `value` for a POSIX shell. Plain words are returned untouched.
pub fn quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:@%+=,".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}

/// How privileged commands are run on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// Run as the connecting user (already root, or elevation disabled).
    Direct,
    /// Wrap in non-interactive sudo; a password prompt fails instead of hanging.
    Sudo,
}

impl Privilege {
    pub fn for_user(user: &str, sudo: Option<bool>) -> Self {
        match sudo {
            Some(true) => Privilege::Sudo,
            Some(false) => Privilege::Direct,
            None if user == "root" => Privilege::Direct,
            None => Privilege::Sudo,
        }
    }

    /// Wrap `command` so it runs with elevated rights.
    pub fn elevate(&self, command: &str) -> String {
        match self {
            Privilege::Direct => command.to_string(),
            Privilege::Sudo => format!("sudo -n sh -c {}", quote(command)),
        }
    }
}
