//! Client command parsing
//!
//! Commands arrive as single text lines with tab-separated parameters:
//!
//! ```text
//! info
//! install<TAB>deviceInstanceId<TAB>packagePath
//! list[<TAB>deviceInstanceId]
//! message
//! shutdown
//! ```
//!
//! The command name is case-insensitive. Parameters are taken verbatim; the
//! `install` path is the remainder of the line so paths containing further
//! tab characters survive unchanged.

use crate::error::{ParseError, Result};

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Request the application name and protocol version.
    Info,
    /// Start a driver installation for the named device.
    Install {
        device_instance_id: String,
        path: String,
    },
    /// List monitored devices, optionally filtered to one instance ID.
    List {
        device_instance_id: Option<String>,
    },
    /// Pop the oldest pending notification.
    Message,
    /// Ask the daemon to shut down.
    Shutdown,
}

impl Command {
    /// Parse one line (without its trailing newline) into a command.
    pub fn parse(line: &str) -> Result<Command> {
        let (name, rest) = match line.split_once('\t') {
            Some((name, rest)) => (name, Some(rest)),
            None => (line, None),
        };

        match name.to_ascii_lowercase().as_str() {
            "info" => Ok(Command::Info),
            "message" => Ok(Command::Message),
            "shutdown" => Ok(Command::Shutdown),
            "list" => {
                let device = rest
                    .and_then(|r| r.split('\t').next())
                    .filter(|d| !d.is_empty())
                    .map(str::to_string);
                Ok(Command::List {
                    device_instance_id: device,
                })
            }
            "install" => {
                let rest = rest.ok_or(ParseError::MissingParameter {
                    command: "install",
                    missing: "deviceId",
                })?;
                let (device, path) = rest.split_once('\t').ok_or(ParseError::MissingParameter {
                    command: "install",
                    missing: "path",
                })?;
                if device.is_empty() {
                    return Err(ParseError::MissingParameter {
                        command: "install",
                        missing: "deviceId",
                    });
                }
                if path.is_empty() {
                    return Err(ParseError::MissingParameter {
                        command: "install",
                        missing: "path",
                    });
                }
                Ok(Command::Install {
                    device_instance_id: device.to_string(),
                    path: path.to_string(),
                })
            }
            _ => Err(ParseError::UnknownCommand(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bare_commands() {
        assert_eq!(Command::parse("info").unwrap(), Command::Info);
        assert_eq!(Command::parse("message").unwrap(), Command::Message);
        assert_eq!(Command::parse("shutdown").unwrap(), Command::Shutdown);
    }

    #[test]
    fn command_name_is_case_insensitive() {
        assert_eq!(Command::parse("INFO").unwrap(), Command::Info);
        assert_eq!(Command::parse("Shutdown").unwrap(), Command::Shutdown);
        assert_eq!(
            Command::parse("LIST").unwrap(),
            Command::List {
                device_instance_id: None
            }
        );
    }

    #[test]
    fn parse_install() {
        let cmd = Command::parse("install\tUSB\\VID_19D2&PID_1350\\FULL_UNAGI\tC:\\Driver Files")
            .unwrap();
        assert_eq!(
            cmd,
            Command::Install {
                device_instance_id: "USB\\VID_19D2&PID_1350\\FULL_UNAGI".to_string(),
                path: "C:\\Driver Files".to_string(),
            }
        );
    }

    #[test]
    fn install_path_keeps_embedded_tabs() {
        let cmd = Command::parse("install\tDEV\\ID\ta\tb").unwrap();
        let Command::Install { path, .. } = cmd else {
            panic!("expected install");
        };
        assert_eq!(path, "a\tb");
    }

    #[test]
    fn install_requires_both_parameters() {
        let err = Command::parse("install").unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingParameter {
                command: "install",
                missing: "deviceId",
            }
        );

        let err = Command::parse("install\tDEV\\ID").unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingParameter {
                command: "install",
                missing: "path",
            }
        );

        let err = Command::parse("install\t\tC:\\pkg").unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingParameter {
                command: "install",
                missing: "deviceId",
            }
        );
    }

    #[test]
    fn parse_list_with_and_without_filter() {
        assert_eq!(
            Command::parse("list").unwrap(),
            Command::List {
                device_instance_id: None
            }
        );
        assert_eq!(
            Command::parse("list\tUSB\\VID_19D2&PID_1350\\FULL_OTORO").unwrap(),
            Command::List {
                device_instance_id: Some("USB\\VID_19D2&PID_1350\\FULL_OTORO".to_string())
            }
        );
        // A trailing empty parameter means no filter.
        assert_eq!(
            Command::parse("list\t").unwrap(),
            Command::List {
                device_instance_id: None
            }
        );
    }

    #[test]
    fn unknown_command_keeps_original_case() {
        let err = Command::parse("Frobnicate\targ").unwrap_err();
        assert_eq!(err, ParseError::UnknownCommand("Frobnicate".to_string()));
    }

    #[test]
    fn empty_line_is_unknown() {
        let err = Command::parse("").unwrap_err();
        assert_eq!(err, ParseError::UnknownCommand(String::new()));
    }

    #[test]
    fn extra_parameters_are_ignored_for_bare_commands() {
        assert_eq!(Command::parse("info\textra\tstuff").unwrap(), Command::Info);
    }
}
