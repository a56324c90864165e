/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Publish/subscribe channel between the components of the chained-BFT core.
//!
//! Publishing never blocks and never calls into a subscriber on the publisher's thread: messages
//! are queued on a channel and handed to subscribers, one message at a time, by a single dispatcher
//! thread. Subscribers therefore see messages in publication order.

use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, RwLock,
    },
    thread::{self, JoinHandle},
};

use crate::messages::{Message, Topic};

/// Implemented by components that want to receive messages of some [`Topic`]s.
pub trait Subscriber: Send + Sync {
    fn on_message(&self, message: &Message);

    /// Called once when the bus closes.
    fn on_quit(&self) {}
}

type SubscriberMap = HashMap<Topic, Vec<Arc<dyn Subscriber>>>;

/// Cloneable handle to a message bus. All clones share one dispatcher thread.
#[derive(Clone)]
pub struct MessageBus {
    subscribers: Arc<RwLock<SubscriberMap>>,
    publisher: Arc<Mutex<Option<Sender<Message>>>>,
    dispatcher: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MessageBus {
    /// Create a bus and start its dispatcher thread.
    pub fn new() -> MessageBus {
        let subscribers: Arc<RwLock<SubscriberMap>> = Arc::new(RwLock::new(HashMap::new()));
        let (publisher, receiver) = mpsc::channel();
        let dispatcher = start_dispatcher(subscribers.clone(), receiver);
        MessageBus {
            subscribers,
            publisher: Arc::new(Mutex::new(Some(publisher))),
            dispatcher: Arc::new(Mutex::new(Some(dispatcher))),
        }
    }

    /// Deliver future messages of `topic` to `subscriber`.
    pub fn register(&self, topic: Topic, subscriber: Arc<dyn Subscriber>) {
        self.subscribers
            .write()
            .unwrap()
            .entry(topic)
            .or_default()
            .push(subscriber);
    }

    /// Queue `message` for delivery. Messages published after [`close`](Self::close) are dropped.
    pub fn publish(&self, message: Message) {
        if let Some(publisher) = self.publisher.lock().unwrap().as_ref() {
            let _ = publisher.send(message);
        } else {
            log::debug!("message bus closed, dropping {:?} message", message.topic());
        }
    }

    /// Deliver every message already queued, stop the dispatcher thread, and tell every subscriber
    /// to quit.
    ///
    /// Must not be called from inside [`Subscriber::on_message`].
    pub fn close(&self) {
        self.publisher.lock().unwrap().take();
        if let Some(dispatcher) = self.dispatcher.lock().unwrap().take() {
            if dispatcher.join().is_err() {
                log::error!("message bus dispatcher panicked");
            }
        }

        let subscribers: Vec<Arc<dyn Subscriber>> = self
            .subscribers
            .write()
            .unwrap()
            .drain()
            .flat_map(|(_, subscribers)| subscribers)
            .collect();
        let mut quit: Vec<Arc<dyn Subscriber>> = Vec::new();
        for subscriber in subscribers {
            // A subscriber registered for several topics is told to quit once.
            if !quit.iter().any(|done| Arc::ptr_eq(done, &subscriber)) {
                subscriber.on_quit();
                quit.push(subscriber);
            }
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

fn start_dispatcher(
    subscribers: Arc<RwLock<SubscriberMap>>,
    receiver: Receiver<Message>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        for message in receiver {
            let targets = subscribers
                .read()
                .unwrap()
                .get(&message.topic())
                .cloned()
                .unwrap_or_default();
            for subscriber in targets {
                subscriber.on_message(&message);
            }
        }
    })
}

#[test]
fn delivers_by_topic_in_order_test() {
    use std::time::Duration;

    struct Recorder(Mutex<Vec<bool>>, Sender<()>);

    impl Subscriber for Recorder {
        fn on_message(&self, message: &Message) {
            if let Message::ProposeState(can_propose) = message {
                self.0.lock().unwrap().push(*can_propose);
                let _ = self.1.send(());
            }
        }
    }

    let (done, wait) = mpsc::channel();
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new()), done));
    let bus = MessageBus::new();
    bus.register(Topic::ProposeState, recorder.clone());

    bus.publish(Message::ProposeState(true));
    bus.publish(Message::CommitBlock(crate::types::block::Block {
        header: crate::types::block::BlockHeader {
            chain_id: String::new(),
            height: Default::default(),
            pre_block_hash: Default::default(),
            block_hash: Default::default(),
            timestamp: 0,
            proposer: Vec::new(),
            tx_count: 0,
            tx_root: Default::default(),
            dag_hash: Default::default(),
            rw_set_root: Default::default(),
            signature: Vec::new(),
        },
        txs: Vec::new(),
        justify: None,
    }));
    bus.publish(Message::ProposeState(false));

    wait.recv_timeout(Duration::from_secs(1)).unwrap();
    wait.recv_timeout(Duration::from_secs(1)).unwrap();
    bus.close();

    assert_eq!(*recorder.0.lock().unwrap(), vec![true, false]);
    bus.publish(Message::ProposeState(true));
}

#[test]
fn close_quits_each_subscriber_once_test() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct QuitCounter(AtomicUsize);

    impl Subscriber for QuitCounter {
        fn on_message(&self, _: &Message) {}

        fn on_quit(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let bus = MessageBus::new();
    let shared = Arc::new(QuitCounter::default());
    let single = Arc::new(QuitCounter::default());
    bus.register(Topic::ProposeState, shared.clone());
    bus.register(Topic::CommitBlock, shared.clone());
    bus.register(Topic::VerifyBlock, shared.clone());
    bus.register(Topic::ProposeState, single.clone());

    bus.close();
    assert_eq!(shared.0.load(Ordering::SeqCst), 1);
    assert_eq!(single.0.load(Ordering::SeqCst), 1);

    // A second close has no subscribers left to quit.
    bus.close();
    assert_eq!(shared.0.load(Ordering::SeqCst), 1);
}
