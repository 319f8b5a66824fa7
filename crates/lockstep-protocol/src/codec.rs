//! Text line codec.
//!
//! Every message is one line: fields separated by [`FIELD_DELIMITER`],
//! terminated by [`MESSAGE_TERMINUS`].
//!
//! ```text
//! S|<id>|<name>                 connect, synchronous
//! A|<id>|<name>|<true|false>    connect, asynchronous (wants data)
//! D|<id>|<frame>                done rendering
//! T|<payload>[|<id>,<id>,...]   data, optionally targeted
//! G|<frame>[|<from>,<payload>]* next frame with embedded data
//! R                             reset
//! P                             toggle pause
//! ```

use std::borrow::Cow;

use lockstep_core::ClientId;
use tracing::warn;

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Command, EmbeddedData, Message, Targets};

/// Separates fields inside a line.
pub const FIELD_DELIMITER: char = '|';

/// Ends every line.
pub const MESSAGE_TERMINUS: char = '\n';

/// Separates target ids in a data line, and sender from payload in an
/// embedded data segment.
pub const LIST_SEPARATOR: char = ',';

/// Replacement for reserved characters found in payloads.
const REPLACEMENT: char = '_';

/// Replaces reserved characters in a payload with an underscore.
///
/// Lossy but never fatal: a warning is logged when anything is replaced.
pub fn sanitize(payload: &str) -> Cow<'_, str> {
    let has_delimiter = payload.contains(FIELD_DELIMITER);
    let has_terminus = payload.contains(MESSAGE_TERMINUS);

    if !has_delimiter && !has_terminus {
        return Cow::Borrowed(payload);
    }
    if has_delimiter {
        warn!(
            "'{}' is not allowed in broadcast messages, replacing with an underscore",
            FIELD_DELIMITER
        );
    }
    if has_terminus {
        warn!("Newlines are not allowed in broadcast messages, replacing with an underscore");
    }

    Cow::Owned(
        payload
            .chars()
            .map(|c| {
                if c == FIELD_DELIMITER || c == MESSAGE_TERMINUS {
                    REPLACEMENT
                } else {
                    c
                }
            })
            .collect(),
    )
}

/// Encodes a message as one terminated wire line.
///
/// Payloads and names are sanitized so the result always holds exactly one
/// line with the expected number of fields.
///
/// # Example
///
/// ```rust
/// use lockstep_protocol::{Message, encode};
///
/// assert_eq!(encode(&Message::next_frame(7)), "G|7\n");
/// ```
pub fn encode(message: &Message) -> String {
    let mut line = String::new();
    line.push(message.command().token());

    match message {
        Message::ConnectSync { client_id, name } => {
            push_field(&mut line, &client_id.to_string());
            push_field(&mut line, &sanitize(name));
        }
        Message::ConnectAsync {
            client_id,
            name,
            wants_data,
        } => {
            push_field(&mut line, &client_id.to_string());
            push_field(&mut line, &sanitize(name));
            push_field(&mut line, if *wants_data { "true" } else { "false" });
        }
        Message::DoneRendering { client_id, frame } => {
            push_field(&mut line, &client_id.to_string());
            push_field(&mut line, &frame.to_string());
        }
        Message::Data { payload, targets } => {
            push_field(&mut line, &sanitize(payload));
            if let Targets::Only(ids) = targets {
                let joined = ids
                    .iter()
                    .map(ClientId::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                push_field(&mut line, &joined);
            }
        }
        Message::NextFrame { frame, embedded } => {
            push_field(&mut line, &frame.to_string());
            for data in embedded {
                push_field(&mut line, &encode_embedded(data));
            }
        }
        Message::Reset | Message::TogglePause => {}
    }

    line.push(MESSAGE_TERMINUS);
    line
}

/// Encodes one embedded segment of a next-frame line: `<from>,<payload>`.
pub fn encode_embedded(data: &EmbeddedData) -> String {
    format!("{}{}{}", data.from, LIST_SEPARATOR, sanitize(&data.payload))
}

fn push_field(line: &mut String, field: &str) {
    line.push(FIELD_DELIMITER);
    line.push_str(field);
}

/// Decodes one wire line, with or without its terminus.
///
/// Malformed embedded segments of a next-frame line are logged and skipped;
/// every other problem rejects the whole line.
///
/// # Example
///
/// ```rust
/// use lockstep_protocol::{EmbeddedData, Message, decode};
///
/// let message = decode("G|21|3,hello|5,wor,ld").unwrap();
/// assert_eq!(
///     message,
///     Message::NextFrame {
///         frame: 21,
///         embedded: vec![EmbeddedData::new(3, "hello"), EmbeddedData::new(5, "wor,ld")],
///     }
/// );
/// ```
pub fn decode(line: &str) -> ProtocolResult<Message> {
    let line = line.strip_suffix(MESSAGE_TERMINUS).unwrap_or(line);
    if line.is_empty() {
        return Err(ProtocolError::EmptyLine);
    }

    let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
    let command = Command::from_token(fields[0])
        .ok_or_else(|| ProtocolError::UnknownCommand(fields[0].to_string()))?;

    match command {
        Command::ConnectSync => {
            expect_handshake(command, &fields, 3)?;
            Ok(Message::ConnectSync {
                client_id: parse_client_id(fields[1])?,
                name: fields[2].to_string(),
            })
        }
        Command::ConnectAsync => {
            expect_handshake(command, &fields, 4)?;
            Ok(Message::ConnectAsync {
                client_id: parse_client_id(fields[1])?,
                name: fields[2].to_string(),
                wants_data: parse_bool(fields[3])?,
            })
        }
        Command::DoneRendering => {
            if fields.len() != 3 {
                return Err(ProtocolError::FieldCount {
                    command: command.token(),
                    expected: "3",
                    found: fields.len(),
                });
            }
            Ok(Message::DoneRendering {
                client_id: parse_client_id(fields[1])?,
                frame: parse_frame(fields[2])?,
            })
        }
        Command::Data => {
            let targets = match fields.len() {
                2 => Targets::All,
                3 => parse_targets(fields[2])?,
                found => {
                    return Err(ProtocolError::FieldCount {
                        command: command.token(),
                        expected: "2 or 3",
                        found,
                    });
                }
            };
            Ok(Message::Data {
                payload: fields[1].to_string(),
                targets,
            })
        }
        Command::NextFrame => {
            if fields.len() < 2 {
                return Err(ProtocolError::FieldCount {
                    command: command.token(),
                    expected: "at least 2",
                    found: fields.len(),
                });
            }
            let frame = parse_frame(fields[1])?;
            let embedded = fields[2..]
                .iter()
                .filter_map(|segment| match decode_embedded(segment) {
                    Ok(data) => Some(data),
                    Err(e) => {
                        warn!(frame, error = %e, "Couldn't parse data message, skipping");
                        None
                    }
                })
                .collect();
            Ok(Message::NextFrame { frame, embedded })
        }
        Command::Reset => Ok(Message::Reset),
        Command::TogglePause => Ok(Message::TogglePause),
    }
}

/// Decodes one `<from>,<payload>` segment, splitting on the first comma only.
pub fn decode_embedded(segment: &str) -> ProtocolResult<EmbeddedData> {
    let (from, payload) = segment
        .split_once(LIST_SEPARATOR)
        .ok_or_else(|| ProtocolError::MalformedDataMessage(segment.to_string()))?;
    let from = from
        .parse::<ClientId>()
        .map_err(|_| ProtocolError::MalformedDataMessage(segment.to_string()))?;
    Ok(EmbeddedData {
        from,
        payload: payload.to_string(),
    })
}

fn expect_handshake(command: Command, fields: &[&str], expected: usize) -> ProtocolResult<()> {
    if fields.len() == expected {
        Ok(())
    } else {
        Err(ProtocolError::MalformedHandshake {
            command: command.token(),
            expected,
            found: fields.len(),
        })
    }
}

fn parse_client_id(value: &str) -> ProtocolResult<ClientId> {
    value.parse().map_err(|_| ProtocolError::InvalidNumber {
        field: "client id",
        value: value.to_string(),
    })
}

fn parse_frame(value: &str) -> ProtocolResult<u64> {
    value.trim().parse().map_err(|_| ProtocolError::InvalidNumber {
        field: "frame number",
        value: value.to_string(),
    })
}

fn parse_bool(value: &str) -> ProtocolResult<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ProtocolError::InvalidBool(other.to_string())),
    }
}

fn parse_targets(value: &str) -> ProtocolResult<Targets> {
    if value.is_empty() {
        return Ok(Targets::Only(Default::default()));
    }
    value
        .split(LIST_SEPARATOR)
        .map(parse_client_id)
        .collect::<ProtocolResult<_>>()
        .map(Targets::Only)
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;

    #[test]
    fn decode_bare_next_frame() {
        assert_eq!(decode("G|7").unwrap(), Message::next_frame(7));
        assert_eq!(decode("G|7\n").unwrap(), Message::next_frame(7));
    }

    #[test]
    fn decode_next_frame_splits_on_first_comma_only() {
        let message = decode("G|21|3,hello|5,wor,ld").unwrap();
        assert_eq!(
            message,
            Message::NextFrame {
                frame: 21,
                embedded: vec![
                    EmbeddedData::new(3, "hello"),
                    EmbeddedData::new(5, "wor,ld"),
                ],
            }
        );
    }

    #[test]
    fn decode_next_frame_skips_bad_segments_only() {
        let message = decode("G|9|nocomma|x,bad id|4,kept").unwrap();
        assert_eq!(
            message,
            Message::NextFrame {
                frame: 9,
                embedded: vec![EmbeddedData::new(4, "kept")],
            }
        );
    }

    #[test]
    fn decode_next_frame_requires_frame_number() {
        assert!(matches!(
            decode("G"),
            Err(ProtocolError::FieldCount { command: 'G', .. })
        ));
        assert!(matches!(
            decode("G|seven"),
            Err(ProtocolError::InvalidNumber { field: "frame number", .. })
        ));
    }

    #[test]
    fn handshake_field_counts_are_strict() {
        assert!(matches!(
            decode("S|1"),
            Err(ProtocolError::MalformedHandshake {
                command: 'S',
                expected: 3,
                found: 2
            })
        ));
        assert!(matches!(
            decode("S|1|name|extra"),
            Err(ProtocolError::MalformedHandshake { found: 4, .. })
        ));
        assert!(matches!(
            decode("A|1|name"),
            Err(ProtocolError::MalformedHandshake {
                command: 'A',
                expected: 4,
                found: 3
            })
        ));
        assert!(matches!(
            decode("A|1|name|maybe"),
            Err(ProtocolError::InvalidBool(_))
        ));
    }

    #[test]
    fn unknown_and_empty_lines_are_rejected() {
        assert!(matches!(
            decode("X|1|2"),
            Err(ProtocolError::UnknownCommand(token)) if token == "X"
        ));
        assert!(matches!(decode(""), Err(ProtocolError::EmptyLine)));
        assert!(matches!(decode("\n"), Err(ProtocolError::EmptyLine)));
    }

    #[test]
    fn data_targets() {
        assert_eq!(
            decode("T|hello").unwrap(),
            Message::Data {
                payload: "hello".into(),
                targets: Targets::All
            }
        );
        assert_eq!(
            decode("T|hello|3,1").unwrap(),
            Message::Data {
                payload: "hello".into(),
                targets: Targets::only([1u32, 3])
            }
        );
        assert!(matches!(
            decode("T|hello|1,two"),
            Err(ProtocolError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn every_variant_survives_a_round_trip() {
        let messages = vec![
            Message::ConnectSync {
                client_id: ClientId(1),
                name: "Rendering Client 1".into(),
            },
            Message::ConnectAsync {
                client_id: ClientId(2),
                name: "controller".into(),
                wants_data: true,
            },
            Message::DoneRendering {
                client_id: ClientId(1),
                frame: 12,
            },
            Message::broadcast("ball,10,20"),
            Message::Data {
                payload: "only you".into(),
                targets: Targets::only([4u32, 8]),
            },
            Message::Data {
                payload: "nobody".into(),
                targets: Targets::only(Vec::<u32>::new()),
            },
            Message::NextFrame {
                frame: u64::MAX,
                embedded: vec![EmbeddedData::new(1, "a,b"), EmbeddedData::new(2, "")],
            },
            Message::Reset,
            Message::TogglePause,
        ];

        for message in messages {
            let line = encode(&message);
            assert!(line.ends_with(MESSAGE_TERMINUS));
            assert_eq!(line.matches(MESSAGE_TERMINUS).count(), 1);
            assert_eq!(decode(&line).unwrap(), message, "line: {line:?}");
        }
    }

    #[test]
    fn encode_wire_lines() {
        assert_snapshot!(encode(&Message::Reset).trim_end(), @"R");
        assert_snapshot!(
            encode(&Message::DoneRendering { client_id: ClientId(3), frame: 5 }).trim_end(),
            @"D|3|5"
        );
        assert_snapshot!(
            encode(&Message::NextFrame {
                frame: 21,
                embedded: vec![EmbeddedData::new(3, "hello"), EmbeddedData::new(5, "wor,ld")],
            })
            .trim_end(),
            @"G|21|3,hello|5,wor,ld"
        );
        assert_snapshot!(
            encode(&Message::Data { payload: "hi".into(), targets: Targets::only([2u32, 1]) })
                .trim_end(),
            @"T|hi|1,2"
        );
    }

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize("plain"), "plain");
        assert!(matches!(sanitize("plain"), Cow::Borrowed(_)));
        assert_eq!(sanitize("a|b\nc"), "a_b_c");
    }

    #[test]
    fn encoded_payloads_never_contain_reserved_characters() {
        let line = encode(&Message::broadcast("x|y\nz"));
        assert_eq!(line, "T|x_y_z\n");

        let line = encode(&Message::NextFrame {
            frame: 2,
            embedded: vec![EmbeddedData::new(1, "p|q\n")],
        });
        assert_eq!(line, "G|2|1,p_q_\n");

        let line = encode(&Message::ConnectSync {
            client_id: ClientId(1),
            name: "left|wall".into(),
        });
        assert_eq!(decode(&line).unwrap().command(), Command::ConnectSync);
    }
}
