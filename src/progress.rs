//! Terminal progress renderer
//!
//! A thin, swappable consumer of the engine's event stream: one
//! `indicatif` bar per active mailbox, keyed by name, driven purely by each
//! event's absolute `total`/`done` fields. Has no privileged access to
//! engine internals — anything implementing `EventReceiver`'s consumer side
//! could replace it.

use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::events::{Event, EventReceiver};

const BAR_TEMPLATE: &str = "{prefix:.bold} [{bar:30.cyan/blue}] {pos}/{len} ({eta})";

/// Drive `rx` to completion, rendering a bar per mailbox to the terminal
///
/// Returns once the event channel closes (the engine run has finished).
pub async fn render(mut rx: EventReceiver) {
    let multi = MultiProgress::new();
    let style = ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");

    let mut bars: HashMap<String, ProgressBar> = HashMap::new();

    while let Some(event) = rx.recv().await {
        match event {
            Event::MailboxStart { mailbox } => {
                let bar = multi.add(ProgressBar::new(0));
                bar.set_style(style.clone());
                bar.set_prefix(mailbox.clone());
                bars.insert(mailbox, bar);
            }
            Event::MailboxProgress {
                mailbox,
                total,
                done,
            } => {
                if let Some(bar) = bars.get(&mailbox) {
                    bar.set_length(total as u64);
                    bar.set_position(done as u64);
                }
            }
            Event::MailboxDone { mailbox, error } => {
                if let Some(bar) = bars.remove(&mailbox) {
                    match error {
                        Some(err) => bar.abandon_with_message(err),
                        None => bar.finish_with_message("done"),
                    }
                }
            }
        }
    }
}
