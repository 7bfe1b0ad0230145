use std::convert::TryInto;

use plover_backend::{Backend, Change};
use plover_protocol as amp;
use amp::{ActorId, ObjectId, Op, OpType, SortedVec};

fn set_op(key: &str, value: &str) -> Op {
    Op {
        obj: ObjectId::Root,
        action: OpType::Set(value.into()),
        key: key.into(),
        insert: false,
        pred: SortedVec::new(),
    }
}

fn change(
    actor: &ActorId,
    seq: u64,
    start_op: u64,
    deps: Vec<amp::ChangeHash>,
    op: Op,
) -> Change {
    amp::Change {
        actor_id: actor.clone(),
        seq,
        start_op,
        time: 0,
        message: None,
        hash: None,
        deps,
        operations: vec![op],
    }
    .into()
}

struct Graph {
    backend: Backend,
    a1: Change,
    a2: Change,
    b1: Change,
    b2: Change,
    b3: Change,
}

/// Two actors with a fork and a merge:
///
///   a1 -- a2 ----------- b3
///   b1 -- b2 ----------/
fn build_graph() -> Graph {
    let actor_a: ActorId = "7b7723afd9e6480397a4d467b7693156".try_into().unwrap();
    let actor_b: ActorId = "37704788917a499cb0206fa8519ac4d9".try_into().unwrap();
    let a1 = change(&actor_a, 1, 1, vec![], set_op("bird", "magpie"));
    let a2 = change(&actor_a, 2, 2, vec![a1.hash], set_op("bug", "ant"));
    let b1 = change(&actor_b, 1, 1, vec![], set_op("bird", "dove"));
    let b2 = change(&actor_b, 2, 2, vec![b1.hash], set_op("bug", "stag beetle"));
    let b3 = change(
        &actor_b,
        3,
        3,
        vec![a2.hash, b2.hash],
        set_op("title", "bugs and birds"),
    );
    let mut backend = Backend::init();
    backend
        .apply_changes(vec![a1.clone(), a2.clone()])
        .unwrap();
    backend
        .apply_changes(vec![b1.clone(), b2.clone()])
        .unwrap();
    backend.apply_changes(vec![b3.clone()]).unwrap();
    Graph {
        backend,
        a1,
        a2,
        b1,
        b2,
        b3,
    }
}

#[test]
fn test_get_changes_from_nothing_returns_everything() {
    let g = build_graph();
    let hashes: Vec<_> = g.backend.get_changes(&[]).iter().map(|c| c.hash).collect();
    assert_eq!(
        hashes,
        vec![g.a1.hash, g.a2.hash, g.b1.hash, g.b2.hash, g.b3.hash]
    );
}

#[test]
fn test_get_changes_linear_suffix() {
    let g = build_graph();
    let hashes: Vec<_> = g
        .backend
        .get_changes(&[g.a2.hash, g.b2.hash])
        .iter()
        .map(|c| c.hash)
        .collect();
    assert_eq!(hashes, vec![g.b3.hash]);
}

#[test]
fn test_get_changes_concurrent_deps() {
    let g = build_graph();
    // a2 alone leaves everything by b plus nothing by a
    let hashes: Vec<_> = g
        .backend
        .get_changes(&[g.a2.hash])
        .iter()
        .map(|c| c.hash)
        .collect();
    assert_eq!(hashes, vec![g.b1.hash, g.b2.hash, g.b3.hash]);
}

#[test]
fn test_get_changes_from_fork_points() {
    let g = build_graph();
    let hashes: Vec<_> = g
        .backend
        .get_changes(&[g.a1.hash, g.b1.hash])
        .iter()
        .map(|c| c.hash)
        .collect();
    assert_eq!(hashes, vec![g.a2.hash, g.b2.hash, g.b3.hash]);
}

#[test]
fn test_get_changes_of_heads_is_empty() {
    let g = build_graph();
    assert_eq!(g.backend.get_changes(&[g.b3.hash]).len(), 0);
}

#[test]
fn test_heads_converge_on_merge_change() {
    let g = build_graph();
    assert_eq!(g.backend.get_heads(), vec![g.b3.hash]);
}

#[test]
fn test_get_changes_added() {
    let g = build_graph();
    let mut partial = Backend::init();
    partial
        .apply_changes(vec![g.a1.clone(), g.a2.clone()])
        .unwrap();
    let added: Vec<_> = g
        .backend
        .get_changes_added(&partial)
        .iter()
        .map(|c| c.hash)
        .collect();
    assert_eq!(added.len(), 3);
    assert!(added.contains(&g.b1.hash));
    assert!(added.contains(&g.b2.hash));
    assert!(added.contains(&g.b3.hash));
    // and nothing is added in the other direction
    assert_eq!(partial.get_changes_added(&g.backend).len(), 0);
}

#[test]
fn test_get_changes_for_actor_id() {
    let g = build_graph();
    let by_b: Vec<_> = g
        .backend
        .get_changes_for_actor_id(g.b1.actor_id())
        .iter()
        .map(|c| c.hash)
        .collect();
    assert_eq!(by_b, vec![g.b1.hash, g.b2.hash, g.b3.hash]);
}

#[test]
fn test_get_missing_deps_is_empty() {
    let g = build_graph();
    assert_eq!(g.backend.get_missing_deps(), vec![]);
}

#[test]
fn test_convergence_of_concurrent_histories() {
    let g = build_graph();
    // a replica that sees b's changes before a's converges to the same
    // document
    let mut other = Backend::init();
    other
        .apply_changes(vec![g.b1.clone(), g.b2.clone()])
        .unwrap();
    other
        .apply_changes(vec![g.a1.clone(), g.a2.clone()])
        .unwrap();
    other.apply_changes(vec![g.b3.clone()]).unwrap();

    assert_eq!(other.get_heads(), g.backend.get_heads());
    assert_eq!(
        other.get_patch().unwrap().clock,
        g.backend.get_patch().unwrap().clock
    );
    assert_eq!(
        other.get_patch().unwrap().diffs,
        g.backend.get_patch().unwrap().diffs
    );
    assert_eq!(other.save().unwrap(), g.backend.save().unwrap());
}
