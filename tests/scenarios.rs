//! End-to-end scenarios against the simulated PLC fleet.
//!
//! Every test runs with the tokio clock paused, so minute-scale protocol
//! timeouts and the six-second settlement delay elapse in virtual time.

mod common;

use std::time::Duration;

use shuttle_gateway::{
    CommandType, Direction, GatewayError, GatewayEvent, Location, TransportTask,
};

use common::{config, signals, TestGateway};

fn task(task_id: &str, command_type: CommandType) -> TransportTask {
    TransportTask {
        task_id: task_id.to_string(),
        command_type,
        device_id: None,
        source_location: None,
        target_location: None,
        gate_number: 1,
        in_dir_block: Direction::Bottom,
        out_dir_block: Direction::Bottom,
    }
}

#[tokio::test(start_paused = true)]
async fn outbound_happy_path() {
    let mut tg = TestGateway::start(config(&["SHUTTLE_01"])).await;
    let s = signals();
    tg.activate("SHUTTLE_01", Location::new(2, 3, 5)).await;

    let mut t1 = task("T1", CommandType::Outbound);
    t1.device_id = Some("SHUTTLE_01".to_string());
    t1.source_location = Some(Location::new(1, 2, 3));
    t1.gate_number = 2;
    tg.gateway.send_command(t1).await.unwrap();

    // The trigger writes land on the device.
    tg.wait_for_bit("SHUTTLE_01", &s.outbound_command).await;
    let sim = tg.sim("SHUTTLE_01");
    assert!(sim.get_bool(&s.start_process_command).await);
    assert_eq!(sim.get_i16(&s.source_floor).await, 1);
    assert_eq!(sim.get_i16(&s.source_rail).await, 2);
    assert_eq!(sim.get_i16(&s.source_block).await, 3);
    assert_eq!(sim.get_i16(&s.gate_number).await, 2);
    assert!(!sim.get_bool(&s.out_dir_block).await);

    // The task has moved from the queue to the assignment map.
    assert!(tg.gateway.get_pending_tasks().is_empty());
    assert_eq!(
        tg.gateway.get_current_task("SHUTTLE_01").as_deref(),
        Some("T1")
    );

    // The shuttle finishes; after settlement the outcome fires.
    sim.set_bool(&s.outbound_complete, true).await;
    match tg.next_task_event().await {
        GatewayEvent::TaskSucceeded { device_id, task_id } => {
            assert_eq!(device_id, "SHUTTLE_01");
            assert_eq!(task_id, "T1");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    assert_eq!(
        tg.gateway.get_device_status("SHUTTLE_01"),
        shuttle_gateway::DeviceStatus::Idle
    );
    assert!(tg.gateway.get_current_task("SHUTTLE_01").is_none());
}

#[tokio::test(start_paused = true)]
async fn inbound_with_valid_barcode() {
    let mut tg = TestGateway::start(config(&["SHUTTLE_01"])).await;
    let s = signals();
    tg.activate("SHUTTLE_01", Location::new(1, 10, 2)).await;

    let mut t2 = task("T2", CommandType::Inbound);
    t2.in_dir_block = Direction::Top;
    tg.gateway.send_command(t2).await.unwrap();

    tg.wait_for_bit("SHUTTLE_01", &s.inbound_command).await;
    let sim = tg.sim("SHUTTLE_01");
    assert!(sim.get_bool(&s.start_process_command).await);
    assert_eq!(sim.get_i16(&s.gate_number).await, 1);
    assert!(sim.get_bool(&s.in_dir_block).await);

    // The scanner reads a pallet barcode.
    for (i, ch) in "ABC1234567".chars().enumerate() {
        sim.set_chars(&s.barcode_chars[i], &ch.to_string()).await;
    }
    match tg.next_task_event().await {
        GatewayEvent::BarcodeReceived {
            device_id,
            task_id,
            barcode,
            ..
        } => {
            assert_eq!(device_id, "SHUTTLE_01");
            assert_eq!(task_id, "T2");
            assert_eq!(barcode, "ABC1234567");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // The external validator answers with routing.
    tg.gateway
        .send_validation_result(
            "SHUTTLE_01",
            "T2",
            true,
            Some(Location::new(1, 5, 3)),
            Direction::Top,
            1,
        )
        .await
        .unwrap();

    assert!(sim.get_bool(&s.barcode_valid).await);
    assert!(!sim.get_bool(&s.barcode_invalid).await);
    assert_eq!(sim.get_i16(&s.target_floor).await, 1);
    assert_eq!(sim.get_i16(&s.target_rail).await, 5);
    assert_eq!(sim.get_i16(&s.target_block).await, 3);
    assert!(sim.get_bool(&s.in_dir_block).await);
    assert_eq!(sim.get_i16(&s.gate_number).await, 1);

    sim.set_bool(&s.inbound_complete, true).await;
    match tg.next_task_event().await {
        GatewayEvent::TaskSucceeded { task_id, .. } => assert_eq!(task_id, "T2"),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn transfer_timeout_fails_with_code_1006() {
    let mut cfg = config(&["SHUTTLE_01"]);
    cfg.task_timeout.transfer_timeout_minutes = 1;
    let mut tg = TestGateway::start(cfg).await;
    tg.activate("SHUTTLE_01", Location::new(1, 1, 1)).await;

    let mut t3 = task("T3", CommandType::Transfer);
    t3.source_location = Some(Location::new(1, 1, 1));
    t3.target_location = Some(Location::new(1, 1, 5));
    tg.gateway.send_command(t3).await.unwrap();

    // The device never raises transfer_complete or alarm.
    match tg.next_task_event().await {
        GatewayEvent::TaskFailed {
            task_id, detail, ..
        } => {
            assert_eq!(task_id, "T3");
            assert_eq!(detail.code, 1006);
            assert!(detail.message.contains("Timeout"));
            assert!(detail.message.contains("1 minutes"));
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(tg.gateway.get_pending_tasks().is_empty());
    assert!(tg.gateway.get_current_task("SHUTTLE_01").is_none());
}

#[tokio::test(start_paused = true)]
async fn alarm_then_device_cancel() {
    let mut tg = TestGateway::start(config(&["SHUTTLE_01"])).await;
    let s = signals();
    tg.activate("SHUTTLE_01", Location::new(2, 3, 5)).await;

    let mut t = task("T4", CommandType::Outbound);
    t.source_location = Some(Location::new(1, 2, 3));
    tg.gateway.send_command(t).await.unwrap();
    tg.wait_for_bit("SHUTTLE_01", &s.outbound_command).await;

    // The shuttle reports a running failure.
    let sim = tg.sim("SHUTTLE_01");
    sim.set_i16(&s.error_code, 7).await;
    sim.set_bool(&s.alarm, true).await;

    match tg.next_task_event().await {
        GatewayEvent::TaskFailed { detail, .. } => {
            assert_eq!(detail.code, 7);
            assert!(detail.message.contains("Target location does not match"));
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(tg.gateway.is_queue_paused());
    assert_eq!(
        tg.gateway.get_device_status("SHUTTLE_01"),
        shuttle_gateway::DeviceStatus::Error
    );

    // The operator cancels the command at the device.
    sim.set_bool(&s.cancel_command, true).await;
    match tg.next_task_event().await {
        GatewayEvent::TaskCancelled { task_id, .. } => assert_eq!(task_id, "T4"),
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(
        tg.gateway.get_device_status("SHUTTLE_01"),
        shuttle_gateway::DeviceStatus::Error
    );
    assert!(tg.gateway.is_queue_paused());

    // No further outcome for T4, ever.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(tg.events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn queue_full_rejects_batch_and_leaves_queue_unchanged() {
    let mut cfg = config(&["SHUTTLE_01"]);
    cfg.task_dispatcher.max_queue_size = 2;
    let tg = TestGateway::start(cfg).await;
    // No device activated: queued tasks stay queued.

    tg.gateway
        .send_multiple_commands(vec![
            task("T1", CommandType::Inbound),
            task("T2", CommandType::Inbound),
        ])
        .await
        .unwrap();

    let err = tg
        .gateway
        .send_multiple_commands(vec![
            task("T_a", CommandType::Inbound),
            task("T_b", CommandType::Inbound),
        ])
        .await
        .unwrap_err();
    let detail = err.detail();
    assert_eq!(detail.code, 1010);
    assert_eq!(
        detail.message,
        "Task queue is full. Cannot enqueue task T_a. Current: 2, Max: 2"
    );

    let pending = tg.gateway.get_pending_tasks();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|t| t.task_id == "T1" || t.task_id == "T2"));
}

#[tokio::test(start_paused = true)]
async fn pinned_priority_ordering_and_removal_rules() {
    let mut tg = TestGateway::start(config(&["D2"])).await;
    let s = signals();
    tg.activate("D2", Location::new(1, 1, 1)).await;

    // Commands complete instantly once triggered.
    tg.sim("D2").set_bool(&s.outbound_complete, true).await;

    tg.gateway.pause_queue();
    let mut n1 = task("N1", CommandType::Outbound);
    n1.source_location = Some(Location::new(1, 2, 3));
    let mut h1 = task("H1", CommandType::Outbound);
    h1.device_id = Some("D2".to_string());
    h1.source_location = Some(Location::new(1, 2, 3));
    let mut n2 = task("N2", CommandType::Outbound);
    n2.source_location = Some(Location::new(1, 2, 3));

    tg.gateway
        .send_multiple_commands(vec![n1, h1, n2])
        .await
        .unwrap();

    // While paused, removal works; unknown ids are a clean no-op.
    assert!(!tg
        .gateway
        .remove_transport_tasks(&["NOPE".to_string()])
        .unwrap());
    assert_eq!(tg.gateway.get_pending_tasks().len(), 3);

    tg.gateway.resume_queue();

    let mut completed = Vec::new();
    for _ in 0..3 {
        match tg.next_task_event().await {
            GatewayEvent::TaskSucceeded { task_id, .. } => completed.push(task_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert_eq!(completed, ["H1", "N1", "N2"]);

    // Removal while the queue is running returns false.
    assert!(!tg
        .gateway
        .remove_transport_tasks(&["X".to_string()])
        .unwrap());
}

#[tokio::test(start_paused = true)]
async fn failed_task_requires_manual_resume() {
    let mut tg = TestGateway::start(config(&["SHUTTLE_01"])).await;
    let s = signals();
    tg.activate("SHUTTLE_01", Location::new(1, 1, 1)).await;

    let mut t = task("T1", CommandType::Outbound);
    t.source_location = Some(Location::new(1, 2, 3));
    tg.gateway.send_command(t).await.unwrap();
    tg.wait_for_bit("SHUTTLE_01", &s.outbound_command).await;

    // More work arrives before the failure hits.
    let mut t2 = task("T2", CommandType::Outbound);
    t2.source_location = Some(Location::new(1, 2, 4));
    tg.gateway.send_command(t2).await.unwrap();

    let sim = tg.sim("SHUTTLE_01");
    sim.set_i16(&s.error_code, 5).await;
    sim.set_bool(&s.command_rejected, true).await;

    match tg.next_task_event().await {
        GatewayEvent::TaskFailed { detail, .. } => assert_eq!(detail.code, 5),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(tg.gateway.is_queue_paused());

    // The pause holds while the alarm stands; nothing dispatches.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(tg.gateway.is_queue_paused());
    assert_eq!(tg.gateway.get_pending_tasks().len(), 1);

    // The device recovers and the operator resumes.
    sim.set_bool(&s.command_rejected, false).await;
    sim.set_i16(&s.error_code, 0).await;
    sim.set_bool(&s.cancel_command, true).await;
    match tg.next_task_event().await {
        GatewayEvent::TaskCancelled { task_id, .. } => assert_eq!(task_id, "T1"),
        other => panic!("unexpected event: {:?}", other),
    }
    // The cancelled device is in Error; clear it before new work.
    sim.set_bool(&s.cancel_command, false).await;
    assert!(tg.gateway.reset_device_status("SHUTTLE_01").await.unwrap());

    // Drop the stale trigger bit so the next write is observable.
    sim.set_bool(&s.outbound_command, false).await;
    tg.gateway.resume_queue();
    tg.wait_for_bit("SHUTTLE_01", &s.outbound_command).await;
    assert_eq!(
        tg.gateway.get_current_task("SHUTTLE_01").as_deref(),
        Some("T2")
    );
}

#[tokio::test(start_paused = true)]
async fn invalid_barcode_writes_inverse_bit_pair() {
    let mut tg = TestGateway::start(config(&["SHUTTLE_01"])).await;
    let s = signals();
    tg.activate("SHUTTLE_01", Location::new(1, 1, 1)).await;

    tg.gateway
        .send_command(task("T5", CommandType::Inbound))
        .await
        .unwrap();
    tg.wait_for_bit("SHUTTLE_01", &s.inbound_command).await;

    let sim = tg.sim("SHUTTLE_01");
    for (i, ch) in "ZZ99999999".chars().enumerate() {
        sim.set_chars(&s.barcode_chars[i], &ch.to_string()).await;
    }
    match tg.next_task_event().await {
        GatewayEvent::BarcodeReceived { barcode, .. } => assert_eq!(barcode, "ZZ99999999"),
        other => panic!("unexpected event: {:?}", other),
    }

    tg.gateway
        .send_validation_result("SHUTTLE_01", "T5", false, None, Direction::Bottom, 0)
        .await
        .unwrap();
    assert!(!sim.get_bool(&s.barcode_valid).await);
    assert!(sim.get_bool(&s.barcode_invalid).await);
    // No routing was written for the rejected pallet.
    assert_eq!(sim.get_i16(&s.target_floor).await, 0);
}

#[tokio::test(start_paused = true)]
async fn validation_write_failure_fails_the_task_exactly_once() {
    let mut tg = TestGateway::start(config(&["SHUTTLE_01"])).await;
    let s = signals();
    tg.activate("SHUTTLE_01", Location::new(1, 1, 1)).await;

    tg.gateway
        .send_command(task("T7", CommandType::Inbound))
        .await
        .unwrap();
    tg.wait_for_bit("SHUTTLE_01", &s.inbound_command).await;

    let sim = tg.sim("SHUTTLE_01");
    for (i, ch) in "ABC1234567".chars().enumerate() {
        sim.set_chars(&s.barcode_chars[i], &ch.to_string()).await;
    }
    match tg.next_task_event().await {
        GatewayEvent::BarcodeReceived { task_id, .. } => assert_eq!(task_id, "T7"),
        other => panic!("unexpected event: {:?}", other),
    }

    // The verdict write never reaches the device.
    sim.fail_address(&s.barcode_valid).await;
    let result = tg
        .gateway
        .send_validation_result(
            "SHUTTLE_01",
            "T7",
            true,
            Some(Location::new(1, 5, 3)),
            Direction::Top,
            1,
        )
        .await;
    assert!(result.is_err());

    match tg.next_task_event().await {
        GatewayEvent::TaskFailed { task_id, detail, .. } => {
            assert_eq!(task_id, "T7");
            assert_eq!(detail.code, 1009);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(tg.gateway.is_queue_paused());
    assert_eq!(
        tg.gateway.get_device_status("SHUTTLE_01"),
        shuttle_gateway::DeviceStatus::Error
    );
    assert!(tg.gateway.get_current_task("SHUTTLE_01").is_none());

    // Even if the shuttle later reports completion, the cancelled poll
    // emits nothing: the failure above stays the only outcome for T7.
    sim.set_bool(&s.inbound_complete, true).await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(tg.events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn queue_and_assignments_never_share_a_task() {
    let mut tg = TestGateway::start(config(&["SHUTTLE_01"])).await;
    let s = signals();
    tg.activate("SHUTTLE_01", Location::new(1, 1, 1)).await;

    let mut t1 = task("T1", CommandType::Outbound);
    t1.source_location = Some(Location::new(1, 2, 3));
    let mut t2 = task("T2", CommandType::Outbound);
    t2.source_location = Some(Location::new(2, 2, 3));
    tg.gateway
        .send_multiple_commands(vec![t1, t2])
        .await
        .unwrap();
    tg.wait_for_bit("SHUTTLE_01", &s.outbound_command).await;

    // T1 is in flight; T2 still queued; neither appears twice.
    let assigned = tg.gateway.get_current_task("SHUTTLE_01").unwrap();
    let pending: Vec<String> = tg
        .gateway
        .get_pending_tasks()
        .into_iter()
        .map(|t| t.task_id)
        .collect();
    assert_eq!(assigned, "T1");
    assert_eq!(pending, ["T2"]);

    let sim = tg.sim("SHUTTLE_01");
    sim.set_bool(&s.outbound_complete, true).await;
    match tg.next_task_event().await {
        GatewayEvent::TaskSucceeded { task_id, .. } => assert_eq!(task_id, "T1"),
        other => panic!("unexpected event: {:?}", other),
    }
    match tg.next_task_event().await {
        GatewayEvent::TaskSucceeded { task_id, .. } => assert_eq!(task_id, "T2"),
        other => panic!("unexpected event: {:?}", other),
    }

    // Everything drained; the dispatcher auto-pauses.
    assert!(tg.gateway.get_pending_tasks().is_empty());
    assert!(tg.gateway.get_current_task("SHUTTLE_01").is_none());
    assert!(tg.gateway.is_queue_paused());
}

#[tokio::test(start_paused = true)]
async fn dispose_stops_dispatching() {
    let tg = TestGateway::start(config(&["SHUTTLE_01"])).await;
    tg.activate("SHUTTLE_01", Location::new(1, 1, 1)).await;
    tg.gateway.dispose().await;

    assert!(matches!(
        tg.gateway.send_command(task("T1", CommandType::Inbound)).await,
        Err(GatewayError::Disposed)
    ));
}

#[tokio::test(start_paused = true)]
async fn dispatcher_state_is_observable_through_the_facade() {
    let tg = TestGateway::start(config(&["SHUTTLE_01"])).await;
    // Auto-pause-when-empty starts the queue paused.
    assert!(tg.gateway.is_queue_paused());
    tg.gateway.resume_queue();
    assert!(!tg.gateway.is_queue_paused());
    tg.gateway.pause_queue();
    tg.gateway.pause_queue();
    assert!(tg.gateway.is_queue_paused());
}
