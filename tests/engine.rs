use tidegraph::query::k_hop;
use tidegraph::wal::{WalCommit, WalReader, WalRecord, VERSION_AT_COMMIT};
use tidegraph::{Graph, GraphConfig, GraphError, Result};

use tempfile::TempDir;

fn open_graph() -> (TempDir, Graph) {
    let dir = TempDir::new().expect("temp dir");
    let graph = Graph::open_with_config(
        &dir.path().join("blocks"),
        &dir.path().join("wal"),
        GraphConfig::small(),
    )
    .expect("open graph");
    (dir, graph)
}

fn setup_vertices(graph: &Graph, count: usize) -> Vec<u64> {
    let mut txn = graph.begin_transaction();
    let ids: Vec<u64> = (0..count)
        .map(|_| txn.new_vertex(true).expect("new vertex"))
        .collect();
    txn.commit(true).expect("commit");
    ids
}

#[test]
fn vertex_put_get_roundtrip() -> Result<()> {
    let (_dir, graph) = open_graph();
    let mut txn = graph.begin_transaction();
    let v = txn.new_vertex(true)?;
    txn.put_vertex(v, b"payload")?;
    // Own write is visible before commit.
    assert_eq!(txn.get_vertex(v)?, Some(&b"payload"[..]));
    txn.commit(true)?;

    let reader = graph.begin_read_only_transaction();
    assert_eq!(reader.get_vertex(v)?, Some(&b"payload"[..]));
    Ok(())
}

#[test]
fn uncommitted_writes_are_invisible() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 1);
    let mut txn = graph.begin_transaction();
    txn.put_vertex(ids[0], b"pending")?;

    let reader = graph.begin_read_only_transaction();
    assert_eq!(reader.get_vertex(ids[0])?, None);
    txn.commit(true)?;
    assert_eq!(reader.get_vertex(ids[0])?, None);

    let after = graph.begin_read_only_transaction();
    assert_eq!(after.get_vertex(ids[0])?, Some(&b"pending"[..]));
    Ok(())
}

#[test]
fn readers_keep_their_snapshot() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 1);
    let mut w0 = graph.begin_transaction();
    w0.put_vertex(ids[0], b"old")?;
    w0.commit(true)?;

    let pinned = graph.begin_read_only_transaction();
    assert_eq!(pinned.get_vertex(ids[0])?, Some(&b"old"[..]));

    let mut w1 = graph.begin_transaction();
    w1.put_vertex(ids[0], b"new")?;
    w1.commit(true)?;

    // The pinned snapshot still resolves the older version in the chain.
    assert_eq!(pinned.get_vertex(ids[0])?, Some(&b"old"[..]));
    let fresh = graph.begin_read_only_transaction();
    assert_eq!(fresh.get_vertex(ids[0])?, Some(&b"new"[..]));
    Ok(())
}

#[test]
fn vertex_tombstone_and_recreate() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 1);
    let v = ids[0];
    let mut w0 = graph.begin_transaction();
    w0.put_vertex(v, b"first")?;
    w0.commit(true)?;

    let before_delete = graph.begin_read_only_transaction();

    let mut w1 = graph.begin_transaction();
    assert!(w1.del_vertex(v, false)?);
    w1.commit(true)?;
    let while_deleted = graph.begin_read_only_transaction();

    let mut w2 = graph.begin_transaction();
    w2.put_vertex(v, b"second")?;
    w2.commit(true)?;

    assert_eq!(before_delete.get_vertex(v)?, Some(&b"first"[..]));
    assert_eq!(while_deleted.get_vertex(v)?, None);
    let after = graph.begin_read_only_transaction();
    assert_eq!(after.get_vertex(v)?, Some(&b"second"[..]));
    Ok(())
}

#[test]
fn deleting_absent_vertex_reports_false() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 1);
    let mut txn = graph.begin_transaction();
    assert!(!txn.del_vertex(ids[0], false)?);
    txn.commit(true)?;
    Ok(())
}

#[test]
fn recycled_id_is_reissued() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 1);
    let mut del = graph.begin_transaction();
    del.del_vertex(ids[0], true)?;
    del.commit(true)?;

    let mut txn = graph.begin_transaction();
    assert_eq!(txn.new_vertex(true)?, ids[0]);
    txn.commit(true)?;
    Ok(())
}

#[test]
fn edge_last_write_wins_without_force() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 2);
    let (s, d) = (ids[0], ids[1]);
    let mut txn = graph.begin_transaction();
    txn.put_edge(s, 1, d, b"x", false)?;
    txn.put_edge(s, 1, d, b"y", false)?;
    txn.commit(true)?;

    let reader = graph.begin_read_only_transaction();
    assert_eq!(reader.get_edge(s, 1, d)?, Some(&b"y"[..]));
    let live: Vec<_> = reader.get_edges(s, 1, false)?.collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].data, b"y");
    Ok(())
}

#[test]
fn force_insert_keeps_every_version() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 2);
    let (s, d) = (ids[0], ids[1]);
    let mut txn = graph.begin_transaction();
    txn.put_edge(s, 1, d, b"x", true)?;
    txn.put_edge(s, 1, d, b"y", true)?;
    txn.commit(true)?;

    let reader = graph.begin_read_only_transaction();
    let live: Vec<_> = reader.get_edges(s, 1, false)?.collect();
    assert_eq!(live.len(), 2);
    // Newest first.
    assert_eq!(live[0].data, b"y");
    assert_eq!(live[1].data, b"x");

    let oldest_first: Vec<_> = reader.get_edges(s, 1, true)?.collect();
    assert_eq!(oldest_first[0].data, b"x");
    assert_eq!(oldest_first[1].data, b"y");
    Ok(())
}

#[test]
fn put_then_delete_leaves_no_live_edge() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 3);
    let mut txn = graph.begin_transaction();
    txn.put_edge(ids[0], 1, ids[2], b"a", false)?;
    assert!(txn.del_edge(ids[0], 1, ids[2])?);
    txn.commit(true)?;

    let reader = graph.begin_read_only_transaction();
    assert_eq!(reader.get_edge(ids[0], 1, ids[2])?, None);
    assert_eq!(reader.get_edges(ids[0], 1, false)?.count(), 0);
    Ok(())
}

#[test]
fn deleted_edge_stays_visible_to_old_snapshots() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 2);
    let mut put = graph.begin_transaction();
    put.put_edge(ids[0], 1, ids[1], b"e", false)?;
    put.commit(true)?;

    let pinned = graph.begin_read_only_transaction();
    let mut del = graph.begin_transaction();
    assert!(del.del_edge(ids[0], 1, ids[1])?);
    del.commit(true)?;

    assert_eq!(pinned.get_edge(ids[0], 1, ids[1])?, Some(&b"e"[..]));
    let fresh = graph.begin_read_only_transaction();
    assert_eq!(fresh.get_edge(ids[0], 1, ids[1])?, None);
    Ok(())
}

#[test]
fn versioned_puts_preserve_history() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 2);
    let (s, d) = (ids[0], ids[1]);
    let mut txn = graph.begin_transaction();
    txn.put_edge_with_version(s, 1, d, b"x", 5, false)?;
    txn.put_edge_with_version(s, 1, d, b"y", 7, false)?;
    txn.commit(true)?;

    let reader = graph.begin_read_only_transaction();
    // Both versions qualify even though "x" was superseded; newest first.
    let versions = reader.get_edge_with_version(s, 1, d, 0, 10)?;
    assert_eq!(versions, vec![&b"y"[..], &b"x"[..]]);
    // The window trims the result set.
    assert_eq!(reader.get_edge_with_version(s, 1, d, 6, 10)?, vec![&b"y"[..]]);
    assert_eq!(reader.get_edge_with_version(s, 1, d, 8, 10)?, Vec::<&[u8]>::new());
    // Point read still resolves the live entry.
    assert_eq!(reader.get_edge(s, 1, d)?, Some(&b"y"[..]));
    Ok(())
}

#[test]
fn versioned_history_survives_block_growth() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 2);
    let (s, d) = (ids[0], ids[1]);
    let mut txn = graph.begin_transaction();
    for version in 0..24i64 {
        let payload = format!("v{version}");
        txn.put_edge_with_version(s, 1, d, payload.as_bytes(), version, false)?;
    }
    txn.commit(true)?;

    let reader = graph.begin_read_only_transaction();
    let versions = reader.get_edge_with_version(s, 1, d, 0, 100)?;
    assert_eq!(versions.len(), 24);
    assert_eq!(versions[0], b"v23");
    assert_eq!(versions[23], b"v0");
    // Only the newest entry is live.
    assert_eq!(reader.get_edges(s, 1, false)?.count(), 1);
    Ok(())
}

#[test]
fn edge_block_growth_keeps_live_and_drops_deleted() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 40);
    let src = ids[0];
    let mut load = graph.begin_transaction();
    for (i, &dst) in ids.iter().enumerate().skip(1) {
        load.put_edge(src, 1, dst, format!("edge-{i}").as_bytes(), false)?;
    }
    load.commit(true)?;

    let pinned = graph.begin_read_only_transaction();

    let mut change = graph.begin_transaction();
    assert!(change.del_edge(src, 1, ids[1])?);
    // Enough churn to force at least one block growth after the delete.
    for (i, &dst) in ids.iter().enumerate().skip(2) {
        change.put_edge(src, 1, dst, format!("edge-{i}-updated").as_bytes(), false)?;
    }
    change.commit(true)?;

    let fresh = graph.begin_read_only_transaction();
    assert_eq!(fresh.get_edge(src, 1, ids[1])?, None);
    assert_eq!(fresh.get_edges(src, 1, false)?.count(), ids.len() - 2);
    assert_eq!(
        fresh.get_edge(src, 1, ids[2])?,
        Some("edge-2-updated".as_bytes())
    );

    // The pre-change snapshot still sees the original block contents.
    assert_eq!(pinned.get_edge(src, 1, ids[1])?, Some("edge-1".as_bytes()));
    assert_eq!(pinned.get_edges(src, 1, false)?.count(), ids.len() - 1);
    assert_eq!(pinned.get_edge(src, 1, ids[2])?, Some("edge-2".as_bytes()));
    Ok(())
}

#[test]
fn large_edge_blocks_use_the_bloom_filter_path() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 201);
    let src = ids[0];
    let payload = [7u8; 30];
    let mut load = graph.begin_transaction();
    for &dst in &ids[1..] {
        load.put_edge(src, 1, dst, &payload, true)?;
    }
    load.commit(true)?;

    // The final block is large enough to carry a bloom region; both the hit
    // and the definitely-absent paths must agree with a full scan.
    let reader = graph.begin_read_only_transaction();
    for &dst in &ids[1..] {
        assert_eq!(reader.get_edge(src, 1, dst)?, Some(&payload[..]));
    }
    assert_eq!(reader.get_edge(src, 1, src)?, None);
    assert_eq!(reader.get_edges(src, 1, false)?.count(), ids.len() - 1);
    Ok(())
}

#[test]
fn abort_restores_previous_state() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 2);
    let mut seed = graph.begin_transaction();
    seed.put_vertex(ids[0], b"kept")?;
    seed.put_edge(ids[0], 1, ids[1], b"kept-edge", false)?;
    seed.commit(true)?;

    let mut txn = graph.begin_transaction();
    txn.put_vertex(ids[0], b"discarded")?;
    txn.del_edge(ids[0], 1, ids[1])?;
    txn.put_edge(ids[0], 2, ids[1], b"discarded-edge", false)?;
    txn.abort()?;

    let reader = graph.begin_read_only_transaction();
    assert_eq!(reader.get_vertex(ids[0])?, Some(&b"kept"[..]));
    assert_eq!(reader.get_edge(ids[0], 1, ids[1])?, Some(&b"kept-edge"[..]));
    assert_eq!(reader.get_edge(ids[0], 2, ids[1])?, None);

    // The vertex is writable again; nothing was left locked or conflicted.
    let mut retry = graph.begin_transaction();
    retry.put_vertex(ids[0], b"rewritten")?;
    retry.commit(true)?;
    Ok(())
}

#[test]
fn write_write_conflict_second_writer_rolls_back() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 1);
    let v = ids[0];
    let mut t1 = graph.begin_transaction();
    let mut t2 = graph.begin_transaction();

    t1.put_vertex(v, b"winner")?;
    t1.commit(true)?;

    let err = t2.put_vertex(v, b"loser").unwrap_err();
    assert!(err.is_rollback(), "expected rollback, got {err}");
    // After the failure only abort is accepted.
    assert!(matches!(
        t2.get_vertex(v),
        Err(GraphError::InvalidState(_))
    ));
    t2.abort()?;

    let reader = graph.begin_read_only_transaction();
    assert_eq!(reader.get_vertex(v)?, Some(&b"winner"[..]));
    Ok(())
}

#[test]
fn contended_vertex_lock_rolls_back() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 1);
    let mut t1 = graph.begin_transaction();
    let mut t2 = graph.begin_transaction();
    t1.put_vertex(ids[0], b"held")?;
    assert!(t2.put_vertex(ids[0], b"blocked").unwrap_err().is_rollback());
    t2.abort()?;
    t1.commit(true)?;
    Ok(())
}

#[test]
fn edge_conflict_names_src_and_label() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 2);
    let mut t1 = graph.begin_transaction();
    let mut t2 = graph.begin_transaction();
    t1.put_edge(ids[0], 7, ids[1], b"first", false)?;
    t1.commit(true)?;

    match t2.put_edge(ids[0], 7, ids[1], b"second", false) {
        Err(GraphError::Rollback(reason)) => {
            assert!(reason.contains(&ids[0].to_string()));
            assert!(reason.contains('7'));
        }
        other => panic!("expected rollback, got {other:?}"),
    }
    t2.abort()?;
    Ok(())
}

#[test]
fn read_only_transactions_reject_writes() -> Result<()> {
    let (_dir, graph) = open_graph();
    setup_vertices(&graph, 1);
    let mut reader = graph.begin_read_only_transaction();
    assert!(reader.put_vertex(0, b"nope").unwrap_err().is_rollback());
    reader.abort()?;
    Ok(())
}

#[test]
fn operations_on_unknown_ids() -> Result<()> {
    let (_dir, graph) = open_graph();
    setup_vertices(&graph, 1);
    let mut txn = graph.begin_transaction();
    assert!(matches!(
        txn.put_vertex(999, b"x"),
        Err(GraphError::InvalidVertex(999))
    ));
    txn.abort()?;

    // Reads on out-of-range ids are simply absent.
    let reader = graph.begin_read_only_transaction();
    assert_eq!(reader.get_vertex(999)?, None);
    assert_eq!(reader.get_edge(999, 1, 0)?, None);
    assert_eq!(reader.get_edges(999, 1, false)?.count(), 0);
    Ok(())
}

#[test]
fn closed_transaction_rejects_everything() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 1);
    let mut txn = graph.begin_transaction();
    txn.put_vertex(ids[0], b"x")?;
    txn.commit(true)?;
    assert!(matches!(
        txn.put_vertex(ids[0], b"y"),
        Err(GraphError::InvalidState(_))
    ));
    assert!(matches!(txn.commit(true), Err(GraphError::InvalidState(_))));
    assert!(matches!(txn.abort(), Err(GraphError::InvalidState(_))));
    Ok(())
}

#[test]
fn wal_records_full_transaction_intent() -> Result<()> {
    let (dir, graph) = open_graph();
    let mut txn = graph.begin_transaction();
    let a = txn.new_vertex(true)?;
    let b = txn.new_vertex(true)?;
    txn.put_vertex(a, b"alpha")?;
    txn.put_edge(a, 1, b, b"plain", false)?;
    txn.put_edge_with_version(a, 1, b, b"versioned", 9, true)?;
    txn.del_edge(a, 1, b)?;
    txn.del_vertex(b, true)?;
    let epoch = txn.commit(true)?;

    let commits = WalReader::read_file(&dir.path().join("wal"))?;
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].epoch, epoch);
    let records = &commits[0].records;
    assert_eq!(records.len(), 7);
    assert_eq!(records[0], WalRecord::NewVertex { vertex: a });
    assert_eq!(records[1], WalRecord::NewVertex { vertex: b });
    assert_eq!(
        records[2],
        WalRecord::PutVertex {
            vertex: a,
            data: b"alpha".to_vec()
        }
    );
    assert_eq!(
        records[3],
        WalRecord::PutEdge {
            src: a,
            label: 1,
            dst: b,
            force_insert: false,
            version: VERSION_AT_COMMIT,
            data: b"plain".to_vec()
        }
    );
    assert_eq!(
        records[4],
        WalRecord::PutEdge {
            src: a,
            label: 1,
            dst: b,
            force_insert: true,
            version: 9,
            data: b"versioned".to_vec()
        }
    );
    assert_eq!(
        records[5],
        WalRecord::DelEdge {
            src: a,
            label: 1,
            dst: b
        }
    );
    assert_eq!(
        records[6],
        WalRecord::DelVertex {
            vertex: b,
            recycle: true
        }
    );
    Ok(())
}

#[test]
fn aborted_transactions_leave_no_wal_frames() -> Result<()> {
    let (dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 1);
    let mut txn = graph.begin_transaction();
    txn.put_vertex(ids[0], b"discarded")?;
    txn.abort()?;

    let commits = WalReader::read_file(&dir.path().join("wal"))?;
    // Only the id-allocation transaction reached the log.
    assert_eq!(commits.len(), 1);
    assert!(commits[0]
        .records
        .iter()
        .all(|r| matches!(r, WalRecord::NewVertex { .. })));
    Ok(())
}

fn replay(graph: &Graph, commits: &[WalCommit]) -> Result<()> {
    for commit in commits {
        let mut txn = graph.begin_transaction();
        for record in &commit.records {
            match record {
                WalRecord::NewVertex { .. } => {
                    txn.new_vertex(false)?;
                }
                WalRecord::PutVertex { vertex, data } => txn.put_vertex(*vertex, data)?,
                WalRecord::DelVertex { vertex, recycle } => {
                    txn.del_vertex(*vertex, *recycle)?;
                }
                WalRecord::PutEdge {
                    src,
                    label,
                    dst,
                    force_insert,
                    version,
                    data,
                } => {
                    if *version == VERSION_AT_COMMIT {
                        txn.put_edge(*src, *label, *dst, data, *force_insert)?;
                    } else {
                        txn.put_edge_with_version(
                            *src,
                            *label,
                            *dst,
                            data,
                            *version,
                            *force_insert,
                        )?;
                    }
                }
                WalRecord::DelEdge { src, label, dst } => {
                    txn.del_edge(*src, *label, *dst)?;
                }
            }
        }
        txn.commit(true)?;
    }
    Ok(())
}

#[test]
fn wal_replay_reproduces_put_then_delete() -> Result<()> {
    let (dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 3);
    let mut txn = graph.begin_transaction();
    txn.put_edge(ids[0], 1, ids[2], b"a", false)?;
    assert!(txn.del_edge(ids[0], 1, ids[2])?);
    txn.commit(true)?;

    let reader = graph.begin_read_only_transaction();
    assert_eq!(reader.get_edges(ids[0], 1, false)?.count(), 0);

    let commits = WalReader::read_file(&dir.path().join("wal"))?;
    let (_dir2, replayed) = open_graph();
    replay(&replayed, &commits)?;
    let reader = replayed.begin_read_only_transaction();
    assert_eq!(reader.get_edges(ids[0], 1, false)?.count(), 0);
    assert_eq!(reader.get_edge(ids[0], 1, ids[2])?, None);
    Ok(())
}

#[test]
fn batch_load_then_k_hop_window() -> Result<()> {
    let (_dir, graph) = open_graph();
    let mut loader = graph.begin_batch_loader();
    let a = loader.new_vertex(true)?;
    let b = loader.new_vertex(true)?;
    let c = loader.new_vertex(true)?;
    loader.put_vertex(a, b"a")?;
    loader.put_vertex(b, b"b")?;
    loader.put_vertex(c, b"c")?;
    loader.put_edge_with_version(a, 1, b, b"ab", 1, false)?;
    loader.put_edge_with_version(b, 1, c, b"bc", 2, false)?;
    loader.commit(true)?;

    let reader = graph.begin_read_only_transaction();
    let result = k_hop(&reader, a, 1, 2, 1, 2)?;
    assert_eq!(result.count, 2);
    assert_eq!(result.visited, 3);

    // A tighter window sees only the first hop.
    let result = k_hop(&reader, a, 1, 2, 1, 1)?;
    assert_eq!(result.count, 1);
    Ok(())
}

#[test]
fn batch_versioned_history_survives_block_growth() -> Result<()> {
    let (_dir, graph) = open_graph();
    let mut loader = graph.begin_batch_loader();
    let s = loader.new_vertex(true)?;
    let d = loader.new_vertex(true)?;
    for version in 0..24i64 {
        let payload = format!("b{version}");
        loader.put_edge_with_version(s, 1, d, payload.as_bytes(), version, false)?;
    }
    loader.commit(true)?;

    let reader = graph.begin_read_only_transaction();
    let versions = reader.get_edge_with_version(s, 1, d, 0, 100)?;
    assert_eq!(versions.len(), 24);
    assert_eq!(versions[0], b"b23");
    assert_eq!(reader.get_edges(s, 1, false)?.count(), 1);
    Ok(())
}

#[test]
fn k_hop_does_not_expand_revisited_vertices() -> Result<()> {
    let (_dir, graph) = open_graph();
    let mut loader = graph.begin_batch_loader();
    let a = loader.new_vertex(true)?;
    let b = loader.new_vertex(true)?;
    loader.put_edge_with_version(a, 1, b, b"ab", 1, false)?;
    loader.put_edge_with_version(b, 1, a, b"ba", 1, false)?;
    loader.commit(true)?;

    let reader = graph.begin_read_only_transaction();
    // a -> b -> a: the back edge is counted but `a` is not re-expanded.
    let result = k_hop(&reader, a, 1, 3, 0, 10)?;
    assert_eq!(result.count, 2);
    assert_eq!(result.visited, 2);
    Ok(())
}

#[test]
fn default_edge_version_is_the_commit_epoch() -> Result<()> {
    let (_dir, graph) = open_graph();
    let ids = setup_vertices(&graph, 2);
    let mut txn = graph.begin_transaction();
    txn.put_edge(ids[0], 1, ids[1], b"e", false)?;
    let epoch = txn.commit(true)?;

    let reader = graph.begin_read_only_transaction();
    let views: Vec<_> = reader.get_edges(ids[0], 1, false)?.collect();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].version, epoch);
    assert_eq!(
        reader.get_edge_with_version(ids[0], 1, ids[1], epoch, epoch)?,
        vec![&b"e"[..]]
    );
    Ok(())
}

#[test]
fn stats_track_progress() -> Result<()> {
    let (_dir, graph) = open_graph();
    let before = graph.stats();
    let ids = setup_vertices(&graph, 3);
    let mut txn = graph.begin_transaction();
    txn.put_vertex(ids[0], b"x")?;
    txn.commit(true)?;
    let after = graph.stats();
    assert_eq!(after.max_vertex_id, 3);
    assert!(after.arena_used > before.arena_used);
    assert!(after.epoch > before.epoch);
    assert!(graph.compaction_candidates().contains(&ids[0]));
    Ok(())
}
