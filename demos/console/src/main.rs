//! Hammers a throttled list with bursts of mutations from a producer thread
//! and prints the coalesced notifications as they arrive.

use std::{sync::Arc, thread, time::Duration};

use anyhow::{Result, anyhow};
use rand::Rng;

use lull_list::{Batch, Delivery, ThrottledList};

const ROUNDS: usize = 10;
const ROUND_PAUSE: Duration = Duration::from_millis(105);

fn main() -> Result<()> {
    env_logger::init();

    let list = Arc::new(ThrottledList::with_items(
        ["hello", "world"].map(String::from),
    ));

    list.subscribe_batches(|batch: &Batch<String>| {
        match batch {
            Batch::Added(items) => println!("Added {} items", items.len()),
            Batch::Removed(items) => println!("Removed {} items", items.len()),
        }
        Delivery::Continue
    });

    // The count handler outlives nothing: it detaches itself as soon as the
    // list is gone.
    let counted = Arc::downgrade(&list);
    list.subscribe_count_changed(move || {
        let Some(list) = counted.upgrade() else {
            return Delivery::Stop;
        };
        println!("Current count: {}", list.len());
        Delivery::Continue
    });

    let producer = {
        let list = list.clone();
        thread::spawn(move || {
            let mut rng = rand::thread_rng();
            for round in 0..ROUNDS {
                if round % 3 == 2 {
                    // Every third round drains a part of the list again.
                    for _ in 0..rng.gen_range(0..=list.len()) {
                        list.remove_at(list.len() - 1);
                    }
                } else {
                    for i in 0..rng.gen_range(1..1000) {
                        list.push(format!("item-{round}-{i}"));
                    }
                }
                thread::sleep(ROUND_PAUSE);
            }
        })
    };

    producer
        .join()
        .map_err(|_| anyhow!("The producer thread panicked"))?;

    // Let the trailing flush land before exiting.
    thread::sleep(Duration::from_millis(200));
    Ok(())
}
