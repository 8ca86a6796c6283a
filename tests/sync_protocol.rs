//! Protocol tests driving the hub through in-process channels.

use gridsync::protocol::{DimensionOperation, InboundMessage, OutboundMessage};
use gridsync::server::{Hub, HubConfig, Session, SessionState};
use gridsync_core::backend::{Backend, GridId};
use gridsync_core::document::SortDirection;
use gridsync_core::presence::Position;
use gridsync_core::{Dimensions, LocalBackend};
use gridsync_engine::engine::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};

struct Client {
    session: Session,
    rx: UnboundedReceiver<OutboundMessage>,
}

impl Client {
    async fn send(&mut self, hub: &Hub<LocalBackend>, message: InboundMessage) {
        hub.handle(&mut self.session, message).await;
    }

    async fn recv(&mut self) -> OutboundMessage {
        tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("channel closed")
    }

    /// Let spawned tasks finish, then take everything queued.
    async fn drain(&mut self) -> Vec<OutboundMessage> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}

fn setup(dimensions: Dimensions) -> (Hub<LocalBackend>, Arc<LocalBackend>) {
    let backend = Arc::new(LocalBackend::new(dimensions, 100));
    let hub = Hub::new(
        Arc::clone(&backend),
        HubConfig {
            palette: vec!["#ABCDEF".to_string()],
            recompute_limit: 100,
            limits: Dimensions::new(50, 10),
        },
    );
    (hub, backend)
}

fn connect(hub: &Hub<LocalBackend>) -> Client {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = hub.connect(tx);
    Client { session, rx }
}

/// Connect, name, select `grid`, and discard the greeting traffic.
async fn join(hub: &Hub<LocalBackend>, name: &str, grid: &GridId) -> Client {
    let mut client = connect(hub);
    client
        .send(hub, InboundMessage::SetName { name: name.into() })
        .await;
    client
        .send(hub, InboundMessage::SelectGrid {
            grid_id: grid.clone(),
        })
        .await;
    client.drain().await;
    client
}

fn edit(cell_id: &str, value: &str, timestamp: i64) -> InboundMessage {
    InboundMessage::CellEdit {
        cell_id: cell_id.into(),
        value: value.into(),
        timestamp: Some(timestamp),
    }
}

/// (cellId, computedValue, provisional) of every cell-update.
fn updates(messages: &[OutboundMessage]) -> Vec<(String, Value, bool)> {
    messages
        .iter()
        .filter_map(|m| match m {
            OutboundMessage::CellUpdate {
                cell_id,
                computed_value,
                provisional,
                ..
            } => Some((cell_id.clone(), computed_value.clone(), *provisional)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_connect_sends_init() {
    let (hub, _) = setup(Dimensions::default());
    let mut client = connect(&hub);
    match client.recv().await {
        OutboundMessage::Init { user_id, color } => {
            assert_eq!(user_id, client.session.id);
            assert_eq!(color, "#ABCDEF");
        }
        other => panic!("expected init, got {other:?}"),
    }
    assert_eq!(client.session.state(), &SessionState::Connecting);
}

#[tokio::test]
async fn test_set_name_broadcasts_visible_users_only() {
    let (hub, _) = setup(Dimensions::default());
    let mut ann = connect(&hub);
    let mut lurker = connect(&hub);
    ann.drain().await;
    lurker.drain().await;

    ann.send(&hub, InboundMessage::SetName { name: "ann".into() })
        .await;
    for client in [&mut ann, &mut lurker] {
        match client.recv().await {
            OutboundMessage::UserList { users, .. } => {
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].name, "ann");
            }
            other => panic!("expected user-list, got {other:?}"),
        }
    }
    assert_eq!(ann.session.state(), &SessionState::Identified);

    ann.send(&hub, InboundMessage::SetName { name: "  ".into() })
        .await;
    assert!(matches!(ann.recv().await, OutboundMessage::Error { .. }));
}

#[tokio::test]
async fn test_grid_requests_require_a_name() {
    let (hub, _) = setup(Dimensions::default());
    let mut client = connect(&hub);
    client.drain().await;

    client.send(&hub, InboundMessage::ListGrids).await;
    match client.recv().await {
        OutboundMessage::Error { error, .. } => assert!(error.contains("name"), "{error}"),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_create_list_and_select_grid() {
    let (hub, backend) = setup(Dimensions::new(4, 3));
    let mut client = connect(&hub);
    client
        .send(&hub, InboundMessage::SetName { name: "ann".into() })
        .await;
    client.drain().await;

    client
        .send(&hub, InboundMessage::CreateGrid { name: "Budget".into() })
        .await;
    let grid = match client.recv().await {
        OutboundMessage::GridCreated {
            grid: Some(grid),
            error: None,
        } => grid,
        other => panic!("expected grid-created, got {other:?}"),
    };

    client
        .send(&hub, InboundMessage::CreateGrid { name: "".into() })
        .await;
    assert!(matches!(
        client.recv().await,
        OutboundMessage::GridCreated {
            grid: None,
            error: Some(_)
        }
    ));

    client.send(&hub, InboundMessage::ListGrids).await;
    match client.recv().await {
        OutboundMessage::GridList { grids } => assert_eq!(grids, vec![grid.clone()]),
        other => panic!("expected grid-list, got {other:?}"),
    }

    backend.update_cell(&grid.id, "B2", "7", 1, None).await.unwrap();
    client
        .send(&hub, InboundMessage::SelectGrid {
            grid_id: grid.id.clone(),
        })
        .await;
    match client.recv().await {
        OutboundMessage::FullGrid {
            grid: cells,
            grid_id,
            dimensions,
            ..
        } => {
            assert_eq!(grid_id, grid.id);
            assert_eq!(dimensions, Dimensions::new(4, 3));
            assert_eq!(cells.len(), 1);
            assert_eq!(cells["1-1"].raw_value, "7");
        }
        other => panic!("expected full-grid, got {other:?}"),
    }
    assert_eq!(
        client.session.state(),
        &SessionState::GridSelected(grid.id.clone())
    );

    client
        .send(&hub, InboundMessage::SelectGrid {
            grid_id: GridId::new("nope"),
        })
        .await;
    assert!(matches!(client.recv().await, OutboundMessage::Error { .. }));
}

#[tokio::test]
async fn test_cell_edit_requires_grid() {
    let (hub, _) = setup(Dimensions::default());
    let mut client = connect(&hub);
    client
        .send(&hub, InboundMessage::SetName { name: "ann".into() })
        .await;
    client.drain().await;

    client.send(&hub, edit("0-0", "1", 1)).await;
    match client.recv().await {
        OutboundMessage::Error { error, .. } => assert_eq!(error, "No grid selected"),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cell_edit_is_provisional_then_authoritative() {
    let (hub, backend) = setup(Dimensions::default());
    let grid = backend.create_grid("g").await.unwrap().id;
    let other_grid = backend.create_grid("other").await.unwrap().id;
    let mut ann = join(&hub, "ann", &grid).await;
    let mut bob = join(&hub, "bob", &grid).await;
    let mut eve = join(&hub, "eve", &other_grid).await;
    ann.drain().await;

    ann.send(&hub, edit("0-0", "2", 1)).await;
    ann.send(&hub, edit("0-1", "=A1*3", 2)).await;
    ann.drain().await;
    bob.drain().await;

    ann.send(&hub, edit("0-0", "5", 3)).await;
    let expected = vec![
        ("0-0".to_string(), Value::Text("5".into()), true),
        ("0-0".to_string(), Value::Text("5".into()), false),
        ("0-1".to_string(), Value::Number(15.0), false),
    ];
    assert_eq!(updates(&ann.drain().await), expected);
    assert_eq!(updates(&bob.drain().await), expected);
    assert!(eve.drain().await.is_empty());

    let stored = backend.get_grid_data(&grid).await.unwrap();
    assert_eq!(stored.cells.len(), 2);
}

#[tokio::test]
async fn test_cell_update_carries_writer_and_timestamp() {
    let (hub, backend) = setup(Dimensions::default());
    let grid = backend.create_grid("g").await.unwrap().id;
    let mut ann = join(&hub, "ann", &grid).await;

    ann.send(&hub, edit("2-3", "hello", 42)).await;
    match ann.recv().await {
        OutboundMessage::CellUpdate {
            cell_id,
            raw_value,
            last_updated_by,
            timestamp,
            provisional,
            ..
        } => {
            assert_eq!(cell_id, "2-3");
            assert_eq!(raw_value, "hello");
            assert_eq!(last_updated_by, Some(ann.session.id));
            assert_eq!(timestamp, 42);
            assert!(provisional);
        }
        other => panic!("expected cell-update, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stale_edit_is_dropped_silently() {
    let (hub, backend) = setup(Dimensions::default());
    let grid = backend.create_grid("g").await.unwrap().id;
    let mut ann = join(&hub, "ann", &grid).await;
    let mut bob = join(&hub, "bob", &grid).await;
    ann.drain().await;

    ann.send(&hub, edit("0-0", "new", 10)).await;
    ann.drain().await;
    bob.drain().await;

    bob.send(&hub, edit("0-0", "old", 9)).await;
    assert!(ann.drain().await.is_empty());
    assert!(bob.drain().await.is_empty());

    let stored = backend.get_grid_data(&grid).await.unwrap();
    let record = stored.cells.values().next().unwrap();
    assert_eq!(record.raw_value, "new");
}

#[tokio::test]
async fn test_upstream_failure_reverts_and_notifies_sender() {
    let (hub, backend) = setup(Dimensions::default());
    let grid = backend.create_grid("g").await.unwrap().id;
    let mut ann = join(&hub, "ann", &grid).await;
    let mut bob = join(&hub, "bob", &grid).await;
    ann.drain().await;

    ann.send(&hub, edit("0-0", "keep", 1)).await;
    ann.drain().await;
    bob.drain().await;

    backend.set_available(false);
    ann.send(&hub, edit("0-0", "lost", 2)).await;

    let ann_messages = ann.drain().await;
    assert_eq!(
        updates(&ann_messages),
        vec![
            ("0-0".to_string(), Value::Text("lost".into()), true),
            ("0-0".to_string(), Value::Text("keep".into()), false),
        ]
    );
    assert!(matches!(
        ann_messages.last(),
        Some(OutboundMessage::Error { error, .. }) if error.contains("Upstream unavailable")
    ));

    let bob_messages = bob.drain().await;
    assert_eq!(updates(&bob_messages).len(), 2);
    assert!(
        !bob_messages
            .iter()
            .any(|m| matches!(m, OutboundMessage::Error { .. }))
    );
}

#[tokio::test]
async fn test_write_outside_bounds_expands_grid() {
    let (hub, backend) = setup(Dimensions::new(2, 2));
    let grid = backend.create_grid("g").await.unwrap().id;
    let mut ann = join(&hub, "ann", &grid).await;

    ann.send(&hub, edit("4-2", "x", 1)).await;
    match ann.recv().await {
        OutboundMessage::GridDimensionsChanged {
            new_dimensions,
            operation,
            ..
        } => {
            assert_eq!(new_dimensions, Dimensions::new(5, 3));
            assert_eq!(operation, DimensionOperation::Expand);
        }
        other => panic!("expected grid-dimensions-changed, got {other:?}"),
    }
    assert!(matches!(ann.recv().await, OutboundMessage::CellUpdate { .. }));
}

#[tokio::test]
async fn test_structural_operations() {
    let (hub, backend) = setup(Dimensions::new(1, 2));
    let grid = backend.create_grid("g").await.unwrap().id;
    let mut ann = join(&hub, "ann", &grid).await;
    let mut bob = join(&hub, "bob", &grid).await;
    ann.drain().await;

    ann.send(&hub, InboundMessage::DeleteRow).await;
    match ann.recv().await {
        OutboundMessage::GridDimensionError { error, .. } => {
            assert_eq!(error, "Cannot delete the last remaining row")
        }
        other => panic!("expected grid-dimension-error, got {other:?}"),
    }
    assert!(bob.drain().await.is_empty());

    ann.send(&hub, InboundMessage::AddRow).await;
    for client in [&mut ann, &mut bob] {
        match client.recv().await {
            OutboundMessage::GridDimensionsChanged {
                grid_id,
                new_dimensions,
                operation,
                ..
            } => {
                assert_eq!(grid_id, grid);
                assert_eq!(new_dimensions, Dimensions::new(2, 2));
                assert_eq!(operation, DimensionOperation::AddRow);
            }
            other => panic!("expected grid-dimensions-changed, got {other:?}"),
        }
    }

    ann.send(&hub, edit("0-0", "=B1+1", 1)).await;
    ann.send(&hub, edit("0-1", "4", 2)).await;
    ann.drain().await;

    ann.send(&hub, InboundMessage::DeleteCol).await;
    let messages = ann.drain().await;
    assert!(matches!(
        messages.first(),
        Some(OutboundMessage::GridDimensionsChanged {
            operation: DimensionOperation::DeleteCol,
            ..
        })
    ));
    assert_eq!(
        updates(&messages),
        vec![("0-0".to_string(), Value::Number(1.0), false)]
    );
    assert_eq!(
        backend.list_grids().await.unwrap()[0].dimensions,
        Dimensions::new(2, 1)
    );
}

#[tokio::test]
async fn test_structural_operation_requires_grid() {
    let (hub, _) = setup(Dimensions::default());
    let mut client = connect(&hub);
    client.drain().await;
    client.send(&hub, InboundMessage::AddCol).await;
    assert!(matches!(
        client.recv().await,
        OutboundMessage::GridDimensionError { .. }
    ));
}

#[tokio::test]
async fn test_edit_beyond_grid_limits_is_rejected() {
    let (hub, backend) = setup(Dimensions::new(4, 3));
    let grid = backend.create_grid("g").await.unwrap().id;
    let mut ann = join(&hub, "ann", &grid).await;
    let mut bob = join(&hub, "bob", &grid).await;
    ann.drain().await;

    for cell_id in ["50-0", "0-10", "1000000000000-0", "18446744073709551615-0"] {
        ann.send(&hub, edit(cell_id, "x", 1)).await;
        match ann.recv().await {
            OutboundMessage::Error { error, .. } => {
                assert!(error.contains("outside the maximum grid size"), "{error}")
            }
            other => panic!("expected error for {cell_id}, got {other:?}"),
        }
    }
    assert!(bob.drain().await.is_empty());
    assert!(backend.get_grid_data(&grid).await.unwrap().cells.is_empty());

    // The session is still usable afterwards.
    ann.send(&hub, edit("49-9", "edge", 2)).await;
    let messages = bob.drain().await;
    assert!(matches!(
        messages.first(),
        Some(OutboundMessage::GridDimensionsChanged {
            new_dimensions,
            operation: DimensionOperation::Expand,
            ..
        }) if *new_dimensions == Dimensions::new(50, 10)
    ));
}

#[tokio::test]
async fn test_add_row_at_limit_is_a_dimension_error() {
    let (hub, backend) = setup(Dimensions::new(50, 2));
    let grid = backend.create_grid("g").await.unwrap().id;
    let mut ann = join(&hub, "ann", &grid).await;

    ann.send(&hub, InboundMessage::AddRow).await;
    match ann.recv().await {
        OutboundMessage::GridDimensionError { error, .. } => {
            assert_eq!(error, "Grid already has the maximum number of rows")
        }
        other => panic!("expected grid-dimension-error, got {other:?}"),
    }
    assert_eq!(
        backend.list_grids().await.unwrap()[0].dimensions,
        Dimensions::new(50, 2)
    );
}

#[tokio::test]
async fn test_sort_column_broadcasts_and_persists() {
    let (hub, backend) = setup(Dimensions::new(3, 1));
    let grid = backend.create_grid("g").await.unwrap().id;
    let mut ann = join(&hub, "ann", &grid).await;

    ann.send(&hub, edit("0-0", "b", 1)).await;
    ann.send(&hub, edit("1-0", "3", 1)).await;
    ann.send(&hub, edit("2-0", "a", 1)).await;
    ann.drain().await;

    ann.send(&hub, InboundMessage::SortColumn {
        col: 0,
        direction: SortDirection::Asc,
    })
    .await;
    let sorted: Vec<(String, Value)> = updates(&ann.drain().await)
        .into_iter()
        .map(|(cell, value, _)| (cell, value))
        .collect();
    assert_eq!(
        sorted,
        vec![
            ("0-0".to_string(), Value::Text("3".into())),
            ("1-0".to_string(), Value::Text("a".into())),
            ("2-0".to_string(), Value::Text("b".into())),
        ]
    );

    let stored = backend.get_grid_data(&grid).await.unwrap();
    let raws: Vec<&str> = stored.cells.values().map(|r| r.raw_value.as_str()).collect();
    assert_eq!(raws, vec!["3", "a", "b"]);
}

#[tokio::test]
async fn test_unnamed_cursor_is_not_broadcast() {
    let (hub, _) = setup(Dimensions::default());
    let mut ann = connect(&hub);
    ann.send(&hub, InboundMessage::SetName { name: "ann".into() })
        .await;
    let mut lurker = connect(&hub);
    ann.drain().await;
    lurker.drain().await;

    let position = Some(Position { row: 0, col: 0 });
    lurker
        .send(&hub, InboundMessage::UserCellPositionChange { position })
        .await;
    assert!(ann.drain().await.is_empty());
    assert!(lurker.drain().await.is_empty());
}

#[tokio::test]
async fn test_position_change_and_leave() {
    let (hub, _) = setup(Dimensions::default());
    let mut ann = connect(&hub);
    let mut bob = connect(&hub);
    ann.send(&hub, InboundMessage::SetName { name: "ann".into() })
        .await;
    bob.send(&hub, InboundMessage::SetName { name: "bob".into() })
        .await;
    ann.drain().await;
    bob.drain().await;

    let position = Some(Position { row: 1, col: 2 });
    ann.send(&hub, InboundMessage::UserCellPositionChange { position })
        .await;
    match bob.recv().await {
        OutboundMessage::UserPositionUpdate {
            user_id,
            position: got,
            ..
        } => {
            assert_eq!(user_id, ann.session.id);
            assert_eq!(got, position);
        }
        other => panic!("expected user-position-update, got {other:?}"),
    }

    let ann_id = ann.session.id;
    hub.disconnect(&mut ann.session);
    assert!(ann.session.is_closed());
    match bob.recv().await {
        OutboundMessage::UserLeave { user_id, .. } => assert_eq!(user_id, ann_id),
        other => panic!("expected user-leave, got {other:?}"),
    }
    match bob.recv().await {
        OutboundMessage::UserList { users, .. } => {
            assert_eq!(users.len(), 1);
            assert_eq!(users[0].name, "bob");
        }
        other => panic!("expected user-list, got {other:?}"),
    }
    assert_eq!(hub.registry().len(), 1);
    assert_eq!(hub.presence().len(), 1);
}

#[tokio::test]
async fn test_malformed_frames_are_ignored() {
    let (hub, _) = setup(Dimensions::default());
    let mut client = connect(&hub);
    client.drain().await;

    hub.handle_text(&mut client.session, "not json").await;
    hub.handle_text(&mut client.session, r#"{"type":"lock-cell"}"#)
        .await;
    assert!(client.drain().await.is_empty());

    hub.handle_text(&mut client.session, r#"{"type":"set-name","name":"ann"}"#)
        .await;
    assert!(matches!(
        client.recv().await,
        OutboundMessage::UserList { .. }
    ));
}
