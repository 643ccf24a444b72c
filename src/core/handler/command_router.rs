// src/core/handler/command_router.rs

//! Executes the connection-level commands: liveness, pub/sub, monitor and
//! client introspection.

use crate::connection::{Connection, ConnectionFlags, SubscriptionKind};
use crate::core::ConnError;
use crate::core::metrics;
use crate::core::protocol::RespFrame;
use crate::core::state::ServerState;
use bytes::Bytes;
use std::str::FromStr;
use strum_macros::{EnumString, IntoStaticStr};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CommandName {
    Ping,
    Echo,
    Quit,
    Subscribe,
    Unsubscribe,
    Psubscribe,
    Punsubscribe,
    Publish,
    Pubsub,
    Monitor,
    Client,
}

impl CommandName {
    /// The commands a client may still issue while it has active subscriptions.
    fn allowed_while_subscribed(self) -> bool {
        matches!(
            self,
            CommandName::Ping
                | CommandName::Quit
                | CommandName::Subscribe
                | CommandName::Unsubscribe
                | CommandName::Psubscribe
                | CommandName::Punsubscribe
        )
    }
}

/// Executes one request against `conn`, replying with an error frame on failure.
pub fn execute(state: &ServerState, conn: &mut Connection, args: &[Bytes]) {
    state.stats.increment_total_commands();
    metrics::COMMANDS_PROCESSED_TOTAL.inc();
    if state.pubsub.has_monitors() {
        feed_monitors(state, conn, args);
    }

    if let Err(e) = dispatch(state, conn, args) {
        debug!("Command failed for client {}: {}", conn.addr(), e);
        conn.reply(RespFrame::Error(e.to_reply_string()).to_bytes());
    }
}

fn dispatch(state: &ServerState, conn: &mut Connection, args: &[Bytes]) -> Result<(), ConnError> {
    let Some((name, rest)) = args.split_first() else {
        return Ok(());
    };
    let name = String::from_utf8_lossy(name).to_lowercase();
    let command =
        CommandName::from_str(&name).map_err(|_| ConnError::UnknownCommand(name.clone()))?;

    if has_subscriptions(conn) && !command.allowed_while_subscribed() {
        return Err(ConnError::InvalidState(format!(
            "Can't execute '{name}': only (P)SUBSCRIBE / (P)UNSUBSCRIBE / PING / QUIT are allowed in this context"
        )));
    }

    match command {
        CommandName::Ping => ping(conn, rest),
        CommandName::Echo => {
            let [message] = rest else {
                return Err(ConnError::WrongArgumentCount(name));
            };
            conn.reply(RespFrame::BulkString(message.clone()).to_bytes());
            Ok(())
        }
        CommandName::Quit => {
            conn.reply(RespFrame::ok().to_bytes());
            conn.enable_flag(ConnectionFlags::CLOSE_AFTER_REPLY);
            Ok(())
        }
        CommandName::Subscribe => subscribe(conn, rest, SubscriptionKind::Channel, &name),
        CommandName::Psubscribe => subscribe(conn, rest, SubscriptionKind::Pattern, &name),
        CommandName::Unsubscribe => {
            unsubscribe(conn, rest, SubscriptionKind::Channel);
            Ok(())
        }
        CommandName::Punsubscribe => {
            unsubscribe(conn, rest, SubscriptionKind::Pattern);
            Ok(())
        }
        CommandName::Publish => {
            let [channel, message] = rest else {
                return Err(ConnError::WrongArgumentCount(name));
            };
            let receivers = state.pubsub.publish(channel, message);
            conn.reply(RespFrame::Integer(receivers as i64).to_bytes());
            Ok(())
        }
        CommandName::Pubsub => pubsub(state, conn, rest),
        CommandName::Monitor => {
            conn.enable_flag(ConnectionFlags::MONITOR);
            conn.reply(RespFrame::ok().to_bytes());
            Ok(())
        }
        CommandName::Client => client(state, conn, rest),
    }
}

fn has_subscriptions(conn: &Connection) -> bool {
    conn.subscriptions_count() + conn.psubscriptions_count() > 0
}

fn total_subscriptions(conn: &Connection) -> i64 {
    (conn.subscriptions_count() + conn.psubscriptions_count()) as i64
}

fn ping(conn: &mut Connection, rest: &[Bytes]) -> Result<(), ConnError> {
    if rest.len() > 1 {
        return Err(ConnError::WrongArgumentCount("ping".to_string()));
    }
    let frame = if has_subscriptions(conn) {
        RespFrame::Array(vec![
            RespFrame::bulk(Bytes::from_static(b"pong")),
            RespFrame::BulkString(rest.first().cloned().unwrap_or_default()),
        ])
    } else {
        match rest.first() {
            Some(message) => RespFrame::BulkString(message.clone()),
            None => RespFrame::SimpleString("PONG".to_string()),
        }
    };
    conn.reply(frame.to_bytes());
    Ok(())
}

/// The confirmation pushed for every (un)subscribe: `[kind, name, total]`.
fn subscription_frame(kind: &'static str, name: Option<&Bytes>, total: i64) -> Bytes {
    RespFrame::Array(vec![
        RespFrame::bulk(Bytes::from_static(kind.as_bytes())),
        name.map_or(RespFrame::Null, |n| RespFrame::BulkString(n.clone())),
        RespFrame::Integer(total),
    ])
    .to_bytes()
}

fn subscribe(
    conn: &mut Connection,
    names: &[Bytes],
    kind: SubscriptionKind,
    command: &str,
) -> Result<(), ConnError> {
    if names.is_empty() {
        return Err(ConnError::WrongArgumentCount(command.to_string()));
    }
    let label = match kind {
        SubscriptionKind::Channel => "subscribe",
        SubscriptionKind::Pattern => "psubscribe",
    };
    for name in names {
        match kind {
            SubscriptionKind::Channel => conn.subscribe_channel(name.clone()),
            SubscriptionKind::Pattern => conn.psubscribe_channel(name.clone()),
        };
        let frame = subscription_frame(label, Some(name), total_subscriptions(conn));
        conn.reply(frame);
    }
    Ok(())
}

fn unsubscribe(conn: &mut Connection, names: &[Bytes], kind: SubscriptionKind) {
    let label = match kind {
        SubscriptionKind::Channel => "unsubscribe",
        SubscriptionKind::Pattern => "punsubscribe",
    };

    if names.is_empty() {
        let removed = match kind {
            SubscriptionKind::Channel => conn.unsubscribe_all(),
            SubscriptionKind::Pattern => conn.punsubscribe_all(),
        };
        if removed.is_empty() {
            let frame = subscription_frame(label, None, total_subscriptions(conn));
            conn.reply(frame);
            return;
        }
        // Counts descend as if each name had been removed one at a time.
        let mut remaining = total_subscriptions(conn) + removed.len() as i64;
        for name in &removed {
            remaining -= 1;
            conn.reply(subscription_frame(label, Some(name), remaining));
        }
        return;
    }

    for name in names {
        match kind {
            SubscriptionKind::Channel => conn.unsubscribe_channel(name),
            SubscriptionKind::Pattern => conn.punsubscribe_channel(name),
        };
        let frame = subscription_frame(label, Some(name), total_subscriptions(conn));
        conn.reply(frame);
    }
}

fn pubsub(state: &ServerState, conn: &mut Connection, rest: &[Bytes]) -> Result<(), ConnError> {
    let Some((sub, args)) = rest.split_first() else {
        return Err(ConnError::WrongArgumentCount("pubsub".to_string()));
    };
    let sub = String::from_utf8_lossy(sub).to_lowercase();
    let frame = match (sub.as_str(), args) {
        ("channels", [] | [_]) => RespFrame::Array(
            state
                .pubsub
                .channels(args.first().map(|p| p.as_ref()))
                .into_iter()
                .map(RespFrame::BulkString)
                .collect(),
        ),
        ("numsub", channels) => RespFrame::Array(
            channels
                .iter()
                .flat_map(|c| {
                    [
                        RespFrame::BulkString(c.clone()),
                        RespFrame::Integer(state.pubsub.numsub(c) as i64),
                    ]
                })
                .collect(),
        ),
        ("numpat", []) => RespFrame::Integer(state.pubsub.numpat() as i64),
        ("channels" | "numpat", _) => {
            return Err(ConnError::WrongArgumentCount(format!("pubsub|{sub}")));
        }
        _ => return Err(ConnError::UnknownSubcommand(sub)),
    };
    conn.reply(frame.to_bytes());
    Ok(())
}

fn client(state: &ServerState, conn: &mut Connection, rest: &[Bytes]) -> Result<(), ConnError> {
    let Some((sub, args)) = rest.split_first() else {
        return Err(ConnError::WrongArgumentCount("client".to_string()));
    };
    let sub = String::from_utf8_lossy(sub).to_lowercase();
    match (sub.as_str(), args) {
        ("id", []) => conn.reply(RespFrame::Integer(conn.id() as i64).to_bytes()),
        ("info", []) => {
            let line = format!("{}\n", client_info_line(conn));
            conn.reply(RespFrame::bulk(line).to_bytes());
        }
        ("kill", [filter, value]) if filter.eq_ignore_ascii_case(b"id") => {
            let id: u64 = std::str::from_utf8(value)
                .map_err(|_| ConnError::NotAnInteger)?
                .parse()?;
            let killed = if id == conn.id() {
                conn.enable_flag(ConnectionFlags::CLOSE_AFTER_REPLY);
                true
            } else {
                state.remove_client(id)
            };
            conn.reply(RespFrame::Integer(i64::from(killed)).to_bytes());
        }
        ("kill", [addr]) => {
            let addr = String::from_utf8_lossy(addr);
            let target = state
                .clients
                .iter()
                .find(|entry| entry.value().addr.to_string() == addr)
                .map(|entry| *entry.key())
                .ok_or(ConnError::NoSuchClient)?;
            if target == conn.id() {
                conn.enable_flag(ConnectionFlags::CLOSE_AFTER_REPLY);
            } else {
                state.remove_client(target);
            }
            conn.reply(RespFrame::ok().to_bytes());
        }
        ("id" | "info" | "kill", _) => {
            return Err(ConnError::WrongArgumentCount(format!("client|{sub}")));
        }
        _ => return Err(ConnError::UnknownSubcommand(sub)),
    }
    Ok(())
}

/// One `CLIENT INFO` line describing `conn`.
pub fn client_info_line(conn: &Connection) -> String {
    format!(
        "id={} addr={} age={} idle={} flags={} sub={} psub={}",
        conn.id(),
        conn.addr(),
        conn.age(),
        conn.idle_time(),
        conn.get_flags(),
        conn.subscriptions_count(),
        conn.psubscriptions_count()
    )
}

fn feed_monitors(state: &ServerState, conn: &Connection, args: &[Bytes]) {
    let now = chrono::Utc::now();
    let mut line = format!(
        "{}.{:06} [0 {}]",
        now.timestamp(),
        now.timestamp_subsec_micros(),
        conn.addr()
    );
    for arg in args {
        line.push_str(&format!(" \"{}\"", arg.escape_ascii()));
    }
    let frame = RespFrame::SimpleString(line).to_bytes();
    state.pubsub.feed_monitors(conn.id(), &frame);
}
