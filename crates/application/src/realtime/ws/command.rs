//! 客户端文本帧命令
//!
//! 形如 `viewstate:<channel>:<state>`，以冒号分隔，命令名大小写不敏感。

use std::collections::HashMap;

use domain::{ChannelId, ViewState};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ClearViewState,
    SetViewState {
        channel_id: ChannelId,
        state: ViewState,
    },
    ResetRtcState,
    /// sessions: session_id -> state
    SetRtcState {
        channel_id: ChannelId,
        sessions: HashMap<String, String>,
    },
    TimelineStreaming(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("invalid args: {0}")]
    InvalidArgs(String),
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("unknown command: {0}")]
    Unknown(String),
}

fn is_null(arg: &str) -> bool {
    arg.is_empty() || arg.eq_ignore_ascii_case("null")
}

pub fn parse(raw: &str) -> Result<Command, CommandError> {
    let cmd = raw.trim();
    let args: Vec<&str> = cmd.split(':').collect();
    let invalid = || CommandError::InvalidArgs(cmd.to_string());

    match args[0].to_ascii_lowercase().as_str() {
        "viewstate" => {
            let Some(channel) = args.get(1) else {
                return Err(invalid());
            };
            if is_null(channel) {
                return Ok(Command::ClearViewState);
            }
            let channel_id: ChannelId = channel
                .parse()
                .map_err(|_| CommandError::InvalidId(channel.to_string()))?;
            let state = args
                .get(2)
                .ok_or_else(invalid)?
                .parse::<ViewState>()
                .map_err(|_| invalid())?;
            Ok(Command::SetViewState { channel_id, state })
        }
        "rtcstate" => {
            let Some(channel) = args.get(1) else {
                return Err(invalid());
            };
            if is_null(channel) {
                return Ok(Command::ResetRtcState);
            }
            let channel_id: ChannelId = channel
                .parse()
                .map_err(|_| CommandError::InvalidId(channel.to_string()))?;
            let pairs = &args[2..];
            match pairs {
                [] => return Err(invalid()),
                [only] if is_null(only) => return Ok(Command::ResetRtcState),
                _ => {}
            }
            // (state, session) 成对出现
            if pairs.len() % 2 != 0 {
                return Err(invalid());
            }
            let mut sessions = HashMap::new();
            for pair in pairs.chunks(2) {
                let (state, session) = (pair[0], pair[1]);
                if state.is_empty() || session.is_empty() {
                    return Err(invalid());
                }
                sessions.insert(session.to_string(), state.to_string());
            }
            Ok(Command::SetRtcState {
                channel_id,
                sessions,
            })
        }
        "timeline_streaming" => {
            if args.len() != 2 {
                return Err(invalid());
            }
            match args[1].to_ascii_lowercase().as_str() {
                "on" | "true" => Ok(Command::TimelineStreaming(true)),
                "off" | "false" => Ok(Command::TimelineStreaming(false)),
                _ => Err(invalid()),
            }
        }
        _ => Err(CommandError::Unknown(cmd.to_string())),
    }
}
