use sprite_atlas_core::prelude::*;

// Every strip hangs one level deeper than the last.
const STRIPS: i32 = 3000;

#[test]
fn thousands_of_column_strips_share_one_atlas() {
    let mut tm = TextureManager::new(16384);
    for i in 0..STRIPS {
        let node = tm.allocate(1, 16384).unwrap();
        assert_eq!(node.atlas, 0, "strip {i}");
        assert_eq!(
            tm.node(node).unwrap().rectangle(),
            Rectangle::new(i, 0, i + 1, 16384)
        );
    }
    assert_eq!(tm.knapsacks().len(), 1);
    assert_eq!(tm.stats().occupied_nodes, STRIPS as usize);
}

#[test]
fn thousands_of_row_strips_share_one_atlas() {
    let mut tm = TextureManager::new(16384);
    for i in 0..STRIPS {
        let node = tm.allocate(16384, 1).unwrap();
        assert_eq!(node.atlas, 0, "strip {i}");
        assert_eq!(
            tm.node(node).unwrap().rectangle(),
            Rectangle::new(0, i, 16384, i + 1)
        );
    }
    assert_eq!(tm.knapsacks().len(), 1);
}

#[test]
fn deep_tree_still_backfills_released_strips() {
    let mut tm = TextureManager::new(16384);
    let strips: Vec<NodeHandle> = (0..STRIPS).map(|_| tm.allocate(1, 16384).unwrap()).collect();
    let early = strips[10];
    tm.release(Some(early)).unwrap();

    let again = tm.allocate(1, 16384).unwrap();
    assert_eq!(again, early);
    assert_eq!(
        tm.node(again).unwrap().rectangle(),
        Rectangle::new(10, 0, 11, 16384)
    );
}

#[test]
fn deferred_strips_solve_without_recursion_limits() {
    let mut tm = TextureManager::new(16384);
    let pending: Vec<PendingNode> = (0..STRIPS)
        .map(|_| tm.allocate_async(1, 16384).unwrap())
        .collect();
    let placed = tm.solve_async().unwrap();
    assert_eq!(placed.len(), STRIPS as usize);
    assert!(placed.iter().all(|h| h.atlas == 0));
    drop(pending);
}
