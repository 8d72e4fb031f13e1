//! 消息正文解析
//!
//! 识别两种内嵌引用：JSON 形式 `!{"type":"user","raw":"@name","id":"<uuid>"}` 和
//! 本站 URL 形式 `<origin>/files/<uuid>`、`<origin>/messages/<uuid>`。
//! 无法解析的内嵌内容原样保留。

use domain::ParsedMessage;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;
use uuid::Uuid;

const ATTACHMENT_PLACEHOLDER: &str = "[添付ファイル]";
const CITATION_PLACEHOLDER: &str = "[引用メッセージ]";

static EMBED_JSON_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)!(\{(?:[ \t\n]*"(?:[^"]|\\.)*"[ \t\n]*:[ \t\n]*"(?:[^"]|\\.)*",)*(?:[ \t\n]*"(?:[^"]|\\.)*"[ \t\n]*:[ \t\n]*"(?:[^"]|\\.)*")\})"#,
    )
    .expect("embed json pattern is valid")
});

const EMBED_URL_FRAGMENT: &str =
    r"/(files|messages)/([\da-f]{8}-[\da-f]{4}-[\da-f]{4}-[\da-f]{4}-[\da-f]{12})";

#[derive(Deserialize)]
struct EmbedInfo {
    raw: String,
    #[serde(rename = "type")]
    kind: String,
    id: Uuid,
}

/// 消息解析器，URL 形式的内嵌依赖站点 origin
#[derive(Debug, Clone)]
pub struct MessageParser {
    url_regex: Regex,
}

impl MessageParser {
    pub fn new(origin: &str) -> Result<Self, regex::Error> {
        let pattern = format!(
            "{}{}",
            regex::escape(origin.trim_end_matches('/')),
            EMBED_URL_FRAGMENT
        );
        Ok(Self {
            url_regex: Regex::new(&pattern)?,
        })
    }

    pub fn parse(&self, text: &str) -> ParsedMessage {
        let mut result = ParsedMessage::default();

        let replaced = EMBED_JSON_REGEX.replace_all(text, |caps: &Captures<'_>| {
            let whole = caps[0].to_string();
            let Ok(info) = serde_json::from_str::<EmbedInfo>(&caps[1]) else {
                return whole;
            };
            match info.kind.as_str() {
                "file" => {
                    result.attachments.push(info.id.into());
                    ATTACHMENT_PLACEHOLDER.to_string()
                }
                "message" => {
                    result.citations.push(info.id.into());
                    CITATION_PLACEHOLDER.to_string()
                }
                "user" => {
                    result.mentions.push(info.id.into());
                    info.raw
                }
                "group" => {
                    result.group_mentions.push(info.id.into());
                    info.raw
                }
                "channel" => {
                    result.channel_links.push(info.id.into());
                    info.raw
                }
                _ => whole,
            }
        });

        let replaced = self
            .url_regex
            .replace_all(&replaced, |caps: &Captures<'_>| {
                let Ok(id) = Uuid::parse_str(&caps[2]) else {
                    return caps[0].to_string();
                };
                match &caps[1] {
                    "files" => {
                        result.attachments.push(id.into());
                        ATTACHMENT_PLACEHOLDER.to_string()
                    }
                    _ => {
                        result.citations.push(id.into());
                        CITATION_PLACEHOLDER.to_string()
                    }
                }
            })
            .into_owned();

        result.plain_text = replaced;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{ChannelId, FileId, GroupId, MessageId, UserId};

    const U1: &str = "ee764d5f-71d9-4a40-bc7b-547d8d097c91";
    const U2: &str = "0f1f6d9e-fb5b-4209-8a6d-33a098e79691";

    fn parser() -> MessageParser {
        MessageParser::new("http://localhost:3000").unwrap()
    }

    fn uuid(s: &str) -> Uuid {
        Uuid::parse_str(s).unwrap()
    }

    #[test]
    fn broken_embeds_are_left_verbatim() {
        let p = parser();
        for text in [
            "test message !{aaa",
            r#"{"test": "test"}!!{}"#,
            "!{aiueo::::aaaaaaa}",
            r#"test message !{"test": "test"}"#,
            r#"!{ test message !{"raw": 1,"type":"user","id":"test_id"}"#,
            r#"!{ test message !{"raw": "1","type":"user","id":"test_id"}"#,
        ] {
            let parsed = p.parse(text);
            assert_eq!(parsed.plain_text, text);
            assert!(parsed.mentions.is_empty());
        }
    }

    #[test]
    fn user_embed_renders_raw() {
        let parsed = parser().parse(&format!(
            r#"test message !{{"raw": "@test","type":"user","id":"{U1}"}}"#
        ));
        assert_eq!(parsed.plain_text, "test message @test");
        assert_eq!(parsed.mentions, vec![UserId::from(uuid(U1))]);
    }

    #[test]
    fn mixed_embeds_collect_every_kind() {
        let text = format!(
            r#"!{{"raw": "","type":"file","id":"{U1}"}}test message !{{"raw": "@test","type":"user","id":"{U2}"}}!{{"raw": "","type":"message","id":"{U1}"}}"#
        );
        let parsed = parser().parse(&text);
        assert_eq!(parsed.plain_text, "[添付ファイル]test message @test[引用メッセージ]");
        assert_eq!(parsed.attachments, vec![FileId::from(uuid(U1))]);
        assert_eq!(parsed.mentions, vec![UserId::from(uuid(U2))]);
        assert_eq!(parsed.citations, vec![MessageId::from(uuid(U1))]);
    }

    #[test]
    fn group_and_channel_embeds() {
        let p = parser();
        let group = p.parse(&format!(
            r#"!{{ test message !{{"raw": "@test","type":"group","id":"{U1}"}}"#
        ));
        assert_eq!(group.plain_text, "!{ test message @test");
        assert_eq!(group.group_mentions, vec![GroupId::from(uuid(U1))]);

        let channel = p.parse(&format!(
            r##"!{{ test message !{{"raw": "#a/e","type":"channel","id":"{U1}"}}"##
        ));
        assert_eq!(channel.plain_text, "!{ test message #a/e");
        assert_eq!(channel.channel_links, vec![ChannelId::from(uuid(U1))]);
    }

    #[test]
    fn url_embeds_are_replaced() {
        let text = format!(
            "http://localhost:3000/messages/{U2} test message http://localhost:3000/files/{U1} http://localhost:3000/fiales/{U1}http://localhost:3000/files/ee764d5fa-71d9-4a40-bc7b-547d8d097c91"
        );
        let parsed = parser().parse(&text);
        assert_eq!(
            parsed.plain_text,
            format!("[引用メッセージ] test message [添付ファイル] http://localhost:3000/fiales/{U1}http://localhost:3000/files/ee764d5fa-71d9-4a40-bc7b-547d8d097c91")
        );
        assert_eq!(parsed.attachments, vec![FileId::from(uuid(U1))]);
        assert_eq!(parsed.citations, vec![MessageId::from(uuid(U2))]);
    }

    #[test]
    fn unknown_type_keeps_json_but_url_still_counts() {
        let text = format!(
            r#"!{{ test message !{{"raw": "1","type":"","id":"{U1}"}} http://localhost:3000/files/{U1}"#
        );
        let parsed = parser().parse(&text);
        assert_eq!(
            parsed.plain_text,
            format!(r#"!{{ test message !{{"raw": "1","type":"","id":"{U1}"}} [添付ファイル]"#)
        );
        assert_eq!(parsed.attachments.len(), 1);
    }

    #[test]
    fn other_origins_are_ignored() {
        let parsed = parser().parse(&format!("https://example.com/files/{U1}"));
        assert!(parsed.attachments.is_empty());
        assert_eq!(parsed.one_line(), format!("https://example.com/files/{U1}"));
    }
}
