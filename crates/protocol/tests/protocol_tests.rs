//! Protocol integration tests
//!
//! Exercises the full wire stack the way the daemon uses it:
//! - Raw socket bytes through [`LineBuffer`] into [`Command::parse`]
//! - [`Reply`] values onto the wire with newline normalization
//! - The exact JSON the browser extension matches on
//!
//! Run with: `cargo test -p protocol --test protocol_tests`

use protocol::{
    BELL, Command, DeviceState, DeviceStateEntry, LineBuffer, MAX_LINE_LEN, ParseError, Reply,
    normalize_newlines,
};

// ============================================================================
// Inbound: bytes to commands
// ============================================================================

/// Feed `data` one byte at a time, the worst case a TCP stream can produce.
fn lines_bytewise(data: &[u8]) -> Vec<String> {
    let mut buf = LineBuffer::new();
    let mut lines = Vec::new();
    for byte in data {
        lines.extend(buf.push_bytes(std::slice::from_ref(byte)));
    }
    lines
}

#[test]
fn test_commands_parse_from_a_bytewise_stream() {
    let stream = b"info\r\nlist\tUSB\\VID_19D2&PID_1350\\FULL_UNAGI\nmessage\n";
    let lines = lines_bytewise(stream);
    assert_eq!(lines.len(), 3);

    assert_eq!(Command::parse(&lines[0]).unwrap(), Command::Info);
    assert_eq!(
        Command::parse(&lines[1]).unwrap(),
        Command::List {
            device_instance_id: Some("USB\\VID_19D2&PID_1350\\FULL_UNAGI".to_string()),
        }
    );
    assert_eq!(Command::parse(&lines[2]).unwrap(), Command::Message);
}

#[test]
fn test_install_survives_framing_with_spaces_and_tabs() {
    let mut buf = LineBuffer::new();
    let lines = buf.push_bytes(b"install\tUSB\\VID_19D2&PID_1350\\FULL_OTORO\tC:\\My Drivers\n");
    assert_eq!(lines.len(), 1);

    let Command::Install {
        device_instance_id,
        path,
    } = Command::parse(&lines[0]).unwrap()
    else {
        panic!("expected an install command");
    };
    assert_eq!(device_instance_id, "USB\\VID_19D2&PID_1350\\FULL_OTORO");
    assert_eq!(path, "C:\\My Drivers");
}

#[test]
fn test_edited_telnet_input_parses_cleanly() {
    // "lisr" corrected to "list" with a backspace, then sent with CRLF.
    let lines = lines_bytewise(b"lisr\x08t\r\n");
    assert_eq!(
        Command::parse(&lines[0]).unwrap(),
        Command::List {
            device_instance_id: None,
        }
    );
}

#[test]
fn test_oversized_garbage_does_not_wedge_the_session() {
    let mut buf = LineBuffer::new();
    let mut stream = vec![b'z'; MAX_LINE_LEN * 2];
    stream.push(b'\n');
    stream.extend_from_slice(b"shutdown\n");

    let lines = buf.push_bytes(&stream);
    assert_eq!(lines, vec!["shutdown"]);
    assert_eq!(buf.take_dropped(), 1);
    assert_eq!(Command::parse(&lines[0]).unwrap(), Command::Shutdown);
}

#[test]
fn test_unknown_and_incomplete_commands_fail_loudly() {
    assert!(matches!(
        Command::parse("reboot"),
        Err(ParseError::UnknownCommand(_))
    ));
    assert!(matches!(
        Command::parse("install\tDEV"),
        Err(ParseError::MissingParameter { .. })
    ));
}

// ============================================================================
// Outbound: replies to bytes
// ============================================================================

/// What the daemon actually writes for a reply: the JSON line plus CRLF.
fn wire_bytes(reply: &Reply) -> String {
    let mut line = normalize_newlines(&reply.to_line().unwrap());
    line.push_str("\r\n");
    line
}

#[test]
fn test_reply_lines_are_single_crlf_terminated_objects() {
    let reply = Reply::List(vec![DeviceStateEntry {
        device_instance_id: "USB\\VID_19D2&PID_1350\\FULL_UNAGI".to_string(),
        state: DeviceState::Installed,
    }]);

    let wire = wire_bytes(&reply);
    assert!(wire.ends_with("\r\n"));
    // Exactly one line; JSON string escaping keeps newlines out of the body.
    assert_eq!(wire.matches('\n').count(), 1);

    let parsed: Reply = serde_json::from_str(wire.trim_end()).unwrap();
    assert_eq!(parsed, reply);
}

#[test]
fn test_error_replies_carry_multiline_messages_safely() {
    let reply = Reply::error("first line\nsecond line");
    let wire = wire_bytes(&reply);

    // The embedded newline is JSON-escaped, not written raw.
    assert_eq!(wire.matches('\n').count(), 1);
    let parsed: Reply = serde_json::from_str(wire.trim_end()).unwrap();
    let Reply::Error { error_message } = parsed else {
        panic!("expected an error reply");
    };
    assert_eq!(error_message, "first line\nsecond line");
}

#[test]
fn test_the_bell_byte_stays_out_of_json_replies() {
    // The extension discriminates replies from pings by the first byte.
    assert_eq!(BELL, 0x07);
    let wire = wire_bytes(&Reply::Install {});
    assert!(!wire.as_bytes().contains(&BELL));
    assert_eq!(wire.as_bytes()[0], b'{');
}

// ============================================================================
// Conversation shapes
// ============================================================================

#[test]
fn test_a_full_session_round_trips() {
    let mut buf = LineBuffer::new();

    // The extension connects and probes the daemon.
    let lines = buf.push_bytes(b"info\r\n");
    assert_eq!(Command::parse(&lines[0]).unwrap(), Command::Info);
    let info = Reply::Info {
        application: "usbmond".to_string(),
        version: protocol::PROTOCOL_VERSION,
    };
    assert_eq!(
        wire_bytes(&info),
        "{\"type\":\"info\",\"data\":{\"application\":\"usbmond\",\"version\":1}}\r\n"
    );

    // It lists devices, gets an empty set, and keeps the session open.
    let lines = buf.push_bytes(b"list\r\n");
    assert!(matches!(
        Command::parse(&lines[0]).unwrap(),
        Command::List { .. }
    ));
    assert_eq!(
        wire_bytes(&Reply::List(Vec::new())),
        "{\"type\":\"list\",\"data\":[]}\r\n"
    );
}
