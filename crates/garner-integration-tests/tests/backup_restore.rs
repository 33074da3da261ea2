//! Upload–download round-trip across a real supplier fleet.
//!
//! One customer, eight supplier nodes, `ecc/4x4`, 64 KiB blocks,
//! a 200 KiB source: four blocks, eight fragments each, full matrix,
//! version sealed in the catalog, byte-exact restore.

use garner_backup::control::{run_task, Task};
use garner_backup::{RestoreWorker, SegmentTransport};
use garner_integration_tests::*;
use garner_session::memory::MemoryLink;

struct Network {
    customer: TestNode,
    suppliers: Vec<TestNode>,
    _links: Vec<MemoryLink>,
}

async fn build_network(supplier_count: usize) -> Network {
    let customer = test_node("alice");
    let mut suppliers = Vec::new();
    let mut links = Vec::new();
    for position in 0..supplier_count {
        let supplier = test_node(&format!("supplier{position}"));
        introduce(&customer, &supplier);
        links.push(connect(&customer, &supplier));
        grant_and_hire(&customer, &supplier, position).await;
        suppliers.push(supplier);
    }
    Network {
        customer,
        suppliers,
        _links: links,
    }
}

#[tokio::test]
async fn upload_download_round_trip() {
    let net = build_network(8).await;
    let customer = &net.customer;
    let source = patterned_bytes(200 * 1024);

    let path_id = {
        let mut catalog = customer.node.catalog.lock().expect("catalog");
        catalog.add_file("cat.bin").expect("add file")
    };

    let backup_id = run_task(
        &customer.node.control,
        &Task {
            path_id: path_id.clone(),
            key_id: customer.customer(),
        },
        source.as_slice(),
        customer.idurl(),
        &customer.node.keyring,
        &customer.node.catalog,
        &customer.node.matrix,
        customer.node.ecc_map.clone(),
        64 * 1024,
        customer.node.segments.clone(),
    )
    .await
    .expect("upload");

    // Four blocks, eight fragments each, every row full.
    {
        let matrix = customer.node.matrix.lock().expect("matrix");
        let state = matrix.version(&backup_id).expect("state");
        assert_eq!(state.block_count, 4);
        assert!(matrix.is_complete(&backup_id));
    }
    for position in 0..8u32 {
        let listing = customer
            .node
            .segments
            .list(position)
            .await
            .expect("listing");
        assert_eq!(listing.segments.len(), 4, "position {position}");
    }

    // The version is sealed in the catalog.
    {
        let catalog = customer.node.catalog.lock().expect("catalog");
        assert!(catalog.knows_version(&backup_id));
        let (size, latest, infos) = catalog.extract_versions(&path_id).expect("versions");
        assert_eq!(size, source.len() as u64);
        assert_eq!(latest, Some(backup_id.version.clone()));
        assert_eq!(infos[0].block_count, 4);
    }

    // Restore and compare byte for byte.
    let unwrap = lock_keyring(customer)
        .unwrap_for(&customer.customer())
        .expect("unwrap");
    let mut restored = Vec::new();
    RestoreWorker::new(
        backup_id,
        customer.node.ecc_map.clone(),
        4,
        unwrap,
        customer.node.segments.clone(),
    )
    .with_creator_key(customer.verifying_key())
    .run(&mut restored)
    .await
    .expect("restore");
    assert_eq!(restored, source);

    drop(net.suppliers);
}

#[tokio::test]
async fn node_level_backup_and_restore() {
    // The daemon-facing flow: seal, persist, events, restore.
    use garner_types::events::Event;

    let net = build_network(8).await;
    let customer = &net.customer;
    let mut events = customer.node.events.subscribe();
    let source = patterned_bytes(120 * 1024);

    let path_id = {
        let mut catalog = customer.node.catalog.lock().expect("catalog");
        catalog.add_file("photos/cat.bin").expect("add file")
    };
    let backup_id = customer
        .node
        .backup_path(&path_id, source.as_slice())
        .await
        .expect("backup");

    let mut saw_sealed = false;
    while let Ok(event) = events.try_recv() {
        if let Event::VersionSealed { backup_id: sealed } = event {
            assert_eq!(sealed, backup_id.to_string());
            saw_sealed = true;
        }
    }
    assert!(saw_sealed, "no VersionSealed event");

    // The index file was persisted with the sealed version.
    let index_path = customer.node.config.data_dir().join("index");
    assert!(index_path.exists());

    let mut restored = Vec::new();
    let written = customer
        .node
        .restore_version(&backup_id, &mut restored)
        .await
        .expect("restore");
    assert_eq!(written, source.len() as u64);
    assert_eq!(restored, source);
}

#[tokio::test]
async fn fleet_ping_round_reports_loss() {
    let mut net = build_network(8).await;
    let customer = &net.customer;

    // All suppliers answer the liveness round.
    assert!(customer.node.ping_suppliers().await.is_empty());

    // One goes dark; the round records the disconnect (the fire timeout
    // has not elapsed, so no slot is fired yet).
    net._links.remove(5).disconnect();
    let actions = customer.node.ping_suppliers().await;
    assert!(actions.is_empty());
    let fleet = customer.node.fleet.lock().expect("fleet");
    assert_eq!(fleet.connected_count(), 7);
}

#[tokio::test]
async fn task_accounting_stays_monotone() {
    // Tasks plus jobs never grow between put_task calls, and the single
    // job limit holds while a producer runs.
    let net = build_network(8).await;
    let customer = &net.customer;

    let paths: Vec<String> = ["a.bin", "b.bin", "c.bin"]
        .iter()
        .map(|name| {
            let mut catalog = customer.node.catalog.lock().expect("catalog");
            catalog.add_file(name).expect("add file")
        })
        .collect();

    for path_id in &paths {
        customer
            .node
            .control
            .put_task(Task {
                path_id: path_id.clone(),
                key_id: customer.customer(),
            })
            .expect("queue");
    }
    assert_eq!(customer.node.control.pending_count(), 3);

    let mut population = customer.node.control.pending_count()
        + customer.node.control.running_count();
    while let Some(task) = customer.node.control.next_task() {
        let source = patterned_bytes(8 * 1024);
        run_task(
            &customer.node.control,
            &task,
            source.as_slice(),
            customer.idurl(),
            &customer.node.keyring,
            &customer.node.catalog,
            &customer.node.matrix,
            customer.node.ecc_map.clone(),
            64 * 1024,
            customer.node.segments.clone(),
        )
        .await
        .expect("run");

        let now = customer.node.control.pending_count()
            + customer.node.control.running_count();
        assert!(now <= population, "population grew without put_task");
        population = now;
    }

    assert_eq!(customer.node.control.pending_count(), 0);
    assert_eq!(customer.node.control.running_count(), 0);
    let catalog = customer.node.catalog.lock().expect("catalog");
    for path_id in &paths {
        assert_eq!(catalog.list_versions(path_id).expect("versions").len(), 1);
    }
}

#[tokio::test]
async fn share_key_round_trip() {
    // Blocks written under a share alias restore with the share key.
    let net = build_network(8).await;
    let customer = &net.customer;
    let source = patterned_bytes(90 * 1024);

    let share = {
        let mut keyring = lock_keyring(customer);
        keyring
            .create_share("share_docs", &customer.customer(), "docs")
            .expect("share")
    };
    let share_gid = garner_types::GlobalId::parse(&share.key_id).expect("gid");

    let path_id = {
        let mut catalog = customer.node.catalog.lock().expect("catalog");
        catalog.add_file("shared.bin").expect("add file")
    };
    let backup_id = run_task(
        &customer.node.control,
        &Task {
            path_id,
            key_id: share_gid.clone(),
        },
        source.as_slice(),
        customer.idurl(),
        &customer.node.keyring,
        &customer.node.catalog,
        &customer.node.matrix,
        customer.node.ecc_map.clone(),
        64 * 1024,
        customer.node.segments.clone(),
    )
    .await
    .expect("upload");

    let unwrap = lock_keyring(customer).unwrap_for(&share_gid).expect("unwrap");
    let mut restored = Vec::new();
    RestoreWorker::new(
        backup_id,
        customer.node.ecc_map.clone(),
        2,
        unwrap,
        customer.node.segments.clone(),
    )
    .run(&mut restored)
    .await
    .expect("restore");
    assert_eq!(restored, source);
}
