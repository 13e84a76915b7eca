use futures::executor::block_on;
use sprite_atlas_core::prelude::*;

#[test]
fn solve_without_queue_fails() {
    let mut tm = TextureManager::new(256);
    let err = tm.solve_async().unwrap_err();
    assert!(matches!(err, AtlasError::QueueNotInitialized));
    assert!(tm.knapsacks().is_empty());
}

#[test]
fn queued_requests_are_placed_in_fifo_order() {
    let mut tm = TextureManager::new(256);
    let mut one = tm.allocate_async(128, 128).unwrap();
    let two = tm.allocate_async(128, 128).unwrap();
    let three = tm.allocate_async(256, 128).unwrap();

    assert_eq!(tm.pending_count(), 3);
    assert!(tm.knapsacks().is_empty());
    assert!(one.try_resolve().is_none());

    let placed = tm.solve_async().unwrap();
    assert_eq!(placed.len(), 3);
    assert_eq!(tm.pending_count(), 0);
    assert_eq!(tm.knapsacks().len(), 1);

    let one = one.try_resolve().unwrap().unwrap();
    let two = block_on(two).unwrap();
    let three = block_on(three).unwrap();
    assert_eq!(placed, vec![one, two, three]);
    assert_eq!(
        tm.node(one).unwrap().rectangle(),
        Rectangle::new(0, 0, 128, 128)
    );
    assert_eq!(
        tm.node(two).unwrap().rectangle(),
        Rectangle::new(128, 0, 256, 128)
    );
    assert_eq!(
        tm.node(three).unwrap().rectangle(),
        Rectangle::new(0, 128, 256, 256)
    );
}

#[test]
fn invalid_requests_fail_eagerly_and_are_not_queued() {
    let mut tm = TextureManager::new(256);
    let err = tm.allocate_async(512, 10).err().unwrap();
    assert!(matches!(
        err,
        AtlasError::TooLarge {
            dimension: Dimension::Width,
            value: 512,
            ..
        }
    ));
    assert_eq!(tm.pending_count(), 0);
    // The queue exists now, so solving is fine and places nothing.
    assert!(tm.solve_async().unwrap().is_empty());
    assert!(tm.knapsacks().is_empty());
}

#[test]
fn queue_is_emptied_after_solving() {
    let mut tm = TextureManager::new(128);
    let pending = tm.allocate_async(64, 64).unwrap();
    assert_eq!(tm.solve_async().unwrap().len(), 1);
    assert!(tm.solve_async().unwrap().is_empty());
    assert!(block_on(pending).is_ok());
}

#[test]
fn dropped_future_still_gets_placed() {
    let mut tm = TextureManager::new(128);
    drop(tm.allocate_async(32, 32).unwrap());
    let placed = tm.solve_async().unwrap();
    assert_eq!(placed.len(), 1);
    assert!(tm.node(placed[0]).unwrap().is_occupied());
}

#[test]
fn deferred_and_direct_requests_interleave() {
    let mut tm = TextureManager::new(256);
    let queued = tm.allocate_async(128, 128).unwrap();
    // Direct allocation claims space before the queue is solved.
    let direct = tm.allocate(128, 128).unwrap();
    tm.solve_async().unwrap();
    let queued = block_on(queued).unwrap();
    assert_eq!(
        tm.node(direct).unwrap().rectangle(),
        Rectangle::new(0, 0, 128, 128)
    );
    assert_eq!(
        tm.node(queued).unwrap().rectangle(),
        Rectangle::new(128, 0, 256, 128)
    );
}

#[test]
fn dropping_the_manager_cancels_pending_requests() {
    let mut tm = TextureManager::new(256);
    let pending = tm.allocate_async(10, 10).unwrap();
    drop(tm);
    assert!(matches!(block_on(pending), Err(AtlasError::Canceled)));
}

#[test]
fn single_future_mode_settles_immediately() {
    let mut tm = TextureManager::new(256);
    let node = block_on(tm.allocate_node(128, 128)).unwrap();
    assert_eq!(tm.uv_coordinates(node).unwrap(), [0.0, 0.5, 0.5, 1.0]);

    let err = block_on(tm.allocate_node(1, 300)).unwrap_err();
    assert!(matches!(
        err,
        AtlasError::TooLarge {
            dimension: Dimension::Height,
            ..
        }
    ));
    assert_eq!(tm.knapsacks().len(), 1);
}
