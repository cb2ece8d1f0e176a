//! Rebuilds the model-facing dialogue from persisted turns.

use palaver_model::{ModelContent, ModelPart};

use crate::codec;
use crate::turn::{Part, Turn};

/// Converts stored turns into the contents of a model request.
///
/// Turn and part order are preserved and text is copied verbatim.
/// Attachments that fail to decode are dropped, as are turns left without
/// any part.
pub fn materialize(turns: &[Turn]) -> Vec<ModelContent> {
    turns.iter().filter_map(materialize_turn).collect()
}

fn materialize_turn(turn: &Turn) -> Option<ModelContent> {
    let parts: Vec<ModelPart> = turn
        .parts
        .iter()
        .enumerate()
        .filter_map(|(idx, part)| match materialize_part(part) {
            Ok(Some(part)) => Some(part),
            Ok(None) => None,
            Err(err) => {
                warn!(turn = %turn.id, part = idx, "dropping attachment: {err}");
                None
            }
        })
        .collect();
    if parts.is_empty() {
        warn!(turn = %turn.id, "dropping turn without usable parts");
        return None;
    }
    Some(ModelContent {
        role: turn.role.into(),
        parts,
    })
}

fn materialize_part(part: &Part) -> Result<Option<ModelPart>, crate::Error> {
    if let Some(text) = part.as_text() {
        return Ok(Some(ModelPart::Text(text.to_owned())));
    }
    let Some((_, data_url)) = part.as_attachment() else {
        return Ok(None);
    };
    let (mime_type, data) = codec::decode(data_url)?;
    Ok(Some(ModelPart::Binary { mime_type, data }))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use palaver_model::ModelRole;

    use super::*;
    use crate::turn::{AttachmentKind, Role, TurnId};

    fn turn(n: i64, role: Role, parts: Vec<Part>) -> Turn {
        Turn {
            id: TurnId::from(format!("t{n}")),
            role,
            parts,
            created_at: Utc.timestamp_opt(1_700_000_000 + n, 0).unwrap(),
        }
    }

    #[test]
    fn test_preserves_order() {
        let turns = vec![
            turn(
                0,
                Role::User,
                vec![
                    Part::text("what is this"),
                    Part::Image {
                        data: codec::encode("image/png", b"png"),
                        file_name: Some("a.png".to_owned()),
                    },
                    Part::Audio {
                        data: codec::encode("audio/webm", b"webm"),
                        file_name: None,
                    },
                ],
            ),
            turn(1, Role::Model, vec![Part::text("a cat")]),
            turn(
                2,
                Role::User,
                vec![Part::Document {
                    data: codec::encode("application/pdf", b"%PDF"),
                    file_name: Some("x.pdf".to_owned()),
                }],
            ),
        ];
        let contents = materialize(&turns);
        assert_eq!(contents.len(), 3);
        assert_eq!(
            contents.iter().map(|c| c.role).collect::<Vec<_>>(),
            vec![ModelRole::User, ModelRole::Model, ModelRole::User]
        );
        assert_eq!(
            contents[0].parts,
            vec![
                ModelPart::Text("what is this".to_owned()),
                ModelPart::Binary {
                    mime_type: "image/png".to_owned(),
                    data: "png".into(),
                },
                ModelPart::Binary {
                    mime_type: "audio/webm".to_owned(),
                    data: "webm".into(),
                },
            ]
        );
        assert_eq!(contents[1], ModelContent::text(ModelRole::Model, "a cat"));
        assert_eq!(
            contents[2].parts,
            vec![ModelPart::Binary {
                mime_type: "application/pdf".to_owned(),
                data: "%PDF".into(),
            }]
        );
    }

    #[test]
    fn test_malformed_attachments_are_dropped() {
        let turns = vec![
            turn(
                0,
                Role::User,
                vec![
                    Part::text("see attached"),
                    Part::Image {
                        data: "not a data url".to_owned(),
                        file_name: None,
                    },
                ],
            ),
            turn(
                1,
                Role::User,
                vec![Part::Audio {
                    data: "data:audio/webm;base64,".to_owned(),
                    file_name: None,
                }],
            ),
            turn(2, Role::Model, vec![Part::text("ok")]),
        ];
        let contents = materialize(&turns);
        assert_eq!(
            contents,
            vec![
                ModelContent::text(ModelRole::User, "see attached"),
                ModelContent::text(ModelRole::Model, "ok"),
            ]
        );
    }

    #[test]
    fn test_keeps_every_well_formed_turn() {
        let png = codec::encode("image/png", b"png");
        let turns = vec![
            turn(0, Role::User, vec![Part::text("say nothing")]),
            turn(1, Role::Model, vec![Part::text(""), Part::text("...")]),
            turn(
                2,
                Role::User,
                vec![
                    Part::text(""),
                    Part::attachment(AttachmentKind::Image, png, None),
                ],
            ),
            turn(3, Role::Model, vec![Part::text("")]),
        ];
        let contents = materialize(&turns);
        assert_eq!(contents.len(), turns.len());
        for (content, turn) in contents.iter().zip(&turns) {
            assert_eq!(content.role, ModelRole::from(turn.role));
            assert_eq!(content.parts.len(), turn.parts.len());
        }
        assert_eq!(contents[1].parts[0], ModelPart::Text(String::new()));
        assert!(matches!(contents[2].parts[1], ModelPart::Binary { .. }));
    }

    #[test]
    fn test_empty_history() {
        assert!(materialize(&[]).is_empty());
    }
}
