use axum::{
    debug_handler,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde::Deserialize;
use tracing::debug;

use crate::{broadcast::Snapshot, db::Message, rooms::msg, store::Store, AppState};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectRoom {
    room_name: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn room_ws(
    State(store): State<Store>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |stream| live_feed(stream, store))
}

async fn live_feed(stream: WebSocket, store: Store) {
    let (mut sender, mut receiver) = stream.split();

    let Some(room_name) = select_room(&mut receiver).await else {
        return;
    };

    let broadcaster = store.broadcaster().clone();
    let (subscription_id, mut rx) = broadcaster.subscribe_channel(&room_name);

    let current: Snapshot = store
        .get_room(&room_name)
        .map(|room| room.messages.into())
        .unwrap_or_else(|_| Snapshot::from(Vec::new()));

    let mut broadcast_task = tokio::spawn(async move {
        let mut delivered = current.len();
        if send_snapshot(&mut sender, &current).await.is_err() {
            return;
        }

        while let Some(mut snapshot) = rx.recv().await {
            // only the newest queued list is worth sending
            while let Ok(next) = rx.try_recv() {
                snapshot = next;
            }
            // rooms only grow, so a list no longer than the last one sent is stale
            if snapshot.len() <= delivered {
                continue;
            }
            delivered = snapshot.len();

            if let Err(err) = send_snapshot(&mut sender, &snapshot).await {
                debug!("live feed send failed: {err}");
                break;
            }
        }
    });

    let relay_room = room_name.clone();
    let mut relay_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            let text = match frame {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => break,
                _ => continue,
            };

            let Ok(msg::SendMessageQuery { sender_name, body, .. }) =
                serde_json::from_str(text.as_str())
            else {
                debug!(room = %relay_room, "dropping unreadable frame");
                continue;
            };

            if let Err(err) = msg::send_msg(&store, &relay_room, sender_name, body) {
                debug!(room = %relay_room, "dropping frame: {err}");
            }
        }
    });

    tokio::select! {
        _ = &mut broadcast_task => relay_task.abort(),
        _ = &mut relay_task => broadcast_task.abort(),
    };

    broadcaster.unsubscribe(&room_name, subscription_id);
    debug!(room = %room_name, %subscription_id, "live feed closed");
}

async fn send_snapshot(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    messages: &[Message],
) -> anyhow::Result<()> {
    let text = serde_json::to_string(messages)?;
    sender.send(WsMessage::text(text)).await?;
    Ok(())
}

async fn select_room(receiver: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(Ok(frame)) = receiver.next().await {
        match frame {
            WsMessage::Text(text) => match serde_json::from_str::<SelectRoom>(text.as_str()) {
                Ok(SelectRoom { room_name }) if !room_name.is_empty() => return Some(room_name),
                _ => debug!("ignoring frame before room selection"),
            },
            WsMessage::Close(_) => return None,
            _ => {}
        }
    }
    None
}
