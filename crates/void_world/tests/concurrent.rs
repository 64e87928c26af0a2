//! Items created and linked from several threads at once

mod common;

use std::thread;

use common::harness;
use void_link::{ItemKind, LinkableId};

const THREADS: usize = 4;
const ITEMS_PER_THREAD: usize = 8;

#[test]
fn test_concurrent_registration_and_linking() {
    let h = harness();
    let hub_cell = h.world.add_partition("hub").unwrap();
    let hub = h
        .world
        .create_item(&h.manager, "marker", ItemKind::Entity, &hub_cell)
        .unwrap();
    let cells: Vec<_> = (0..THREADS)
        .map(|i| h.world.add_partition(&format!("cell_{}", i)).unwrap())
        .collect();

    let created: Vec<Vec<LinkableId>> = thread::scope(|scope| {
        let workers: Vec<_> = cells
            .iter()
            .map(|cell| {
                let h = &h;
                let hub = &hub;
                scope.spawn(move || {
                    (0..ITEMS_PER_THREAD)
                        .map(|_| {
                            let item = h
                                .world
                                .create_item(&h.manager, "switch", ItemKind::DataObject, cell)
                                .unwrap();
                            let index = item.link_index("target").unwrap();
                            h.manager.add_link(item.linkable(), hub.linkable(), index).unwrap();
                            item.id()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    h.settle();
    let total = THREADS * ITEMS_PER_THREAD;
    assert_eq!(h.manager.registered_count(), total + 1);
    assert_eq!(hub.linkable().back_link_count(), total);
    assert_eq!(hub.linkable().links().len(), total);
    assert_eq!(h.history.undo_count(), total);

    for (ids, cell) in created.iter().zip(&cells) {
        for id in ids {
            let item = h.world.item(*id).unwrap();
            assert_eq!(item.link("target").unwrap().partition, hub_cell);
            assert!(item.linkable().is_linked_to(hub.id()));
            assert_eq!(h.manager.cached_location(*id).as_ref(), Some(cell));

            // The entity hub owns every link
            let link = hub.linkable().link_to(item.linkable()).unwrap();
            assert!(link.is_owned_by(hub.linkable()));
        }
    }
    assert!(h.manager.is_idle());
}
