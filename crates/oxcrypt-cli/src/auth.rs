//! Passphrase acquisition.

use std::io::{self, IsTerminal};

use anyhow::{Context, Result};
use secrecy::SecretString;

/// Password sources from the command line.
#[derive(Debug, Default, Clone)]
pub struct PasswordOptions {
    pub password: Option<String>,
    pub password_stdin: bool,
    pub password_fd: Option<i32>,
}

/// Get passphrase using the priority chain:
/// 1. --password-stdin
/// 2. --password-fd
/// 3. --password / OXCRYPT_PASSWORD
/// 4. Interactive prompt
pub fn get_passphrase(opts: &PasswordOptions) -> Result<SecretString> {
    let password = if opts.password_stdin {
        read_password_from_stdin()?
    } else if let Some(fd) = opts.password_fd {
        read_password_from_fd(fd)?
    } else if let Some(ref password) = opts.password {
        password.clone()
    } else {
        prompt_passphrase()?
    };
    Ok(SecretString::from(password))
}

/// Prompt on the terminal without echo.
fn prompt_passphrase() -> Result<String> {
    if !io::stdin().is_terminal() {
        anyhow::bail!(
            "No passphrase given and stdin is not a terminal.\n\
             Use --password-stdin, --password-fd or OXCRYPT_PASSWORD."
        );
    }

    let password = rpassword::prompt_password("Vault passphrase: ")
        .context("Failed to read passphrase")?;
    if password.is_empty() {
        anyhow::bail!("Passphrase is empty");
    }
    Ok(password)
}

/// Read password from stdin (first line only)
fn read_password_from_stdin() -> Result<String> {
    if io::stdin().is_terminal() {
        anyhow::bail!(
            "--password-stdin requires password to be piped in.\n\
             Example: echo \"$SECRET\" | oxcrypt --password-stdin mount ~/vault"
        );
    }

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;
    let password = trim_line_ending(&password);

    if password.is_empty() {
        anyhow::bail!("Password from stdin is empty");
    }

    Ok(password.to_string())
}

/// Read password from a file descriptor
#[cfg(unix)]
#[allow(unsafe_code)]
fn read_password_from_fd(fd: i32) -> Result<String> {
    use std::io::Read;
    use std::mem::ManuallyDrop;
    use std::os::unix::io::FromRawFd;

    // SAFETY: the caller passed this descriptor explicitly with --password-fd.
    // ManuallyDrop keeps it open for its owner.
    let mut file = ManuallyDrop::new(unsafe { std::fs::File::from_raw_fd(fd) });
    let mut password = String::new();
    file.read_to_string(&mut password)
        .with_context(|| format!("Failed to read password from file descriptor {fd}"))?;

    let password = password.trim();
    if password.is_empty() {
        anyhow::bail!("Password from file descriptor {fd} is empty");
    }

    Ok(password.to_string())
}

#[cfg(not(unix))]
fn read_password_from_fd(_fd: i32) -> Result<String> {
    anyhow::bail!("--password-fd is only supported on Unix systems");
}

fn trim_line_ending(line: &str) -> &str {
    line.trim_end_matches('\n').trim_end_matches('\r')
}
