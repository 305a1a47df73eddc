//! Module `thread` implement the worker-thread pattern used across
//! the import pipeline.
//!
//! Every long-lived stage of the pipeline - the free-buffer pool, the
//! per-index spill writers, the sort executor - is a thread owning its
//! own state and fed through a channel, in the gen-server manner: no
//! shared mutable state, all coordination is messages. A stage accepts
//! fire-and-forget posts and round-trip requests over the same
//! channel. Dropping every sender disconnects the channel; a stage's
//! main loop must drain its [Rx] until disconnect, which is how the
//! whole pipeline winds down in stage order.

use std::{sync::mpsc, thread};

use crate::{Error, Result};

/// What flows into a stage: the message, plus a reply channel when
/// the caller waits for an answer.
pub type Msg<Q, R> = (Q, Option<mpsc::Sender<R>>);

/// Receiving side of a stage's input channel, handed to its main
/// loop.
pub type Rx<Q, R = ()> = mpsc::Receiver<Msg<Q, R>>;

/// One pipeline stage: a worker thread plus the sending side of its
/// input channel.
///
/// `join` (and the drop path) disconnect the stage's own sender
/// first, so a stage with no outstanding [Tx] clones always winds
/// down; a stage fed by live clones keeps running until they drop.
pub struct Thread<Q, R = (), T = ()> {
    name: String,
    handle: Option<thread::JoinHandle<T>>,
    tx: Option<Tx<Q, R>>,
}

impl<Q, R, T> Drop for Thread<Q, R, T> {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

impl<Q, R, T> Thread<Q, R, T> {
    /// Spawn a stage fed by an unbounded channel. `main_loop` is
    /// called with the [Rx] side and returns the closure the thread
    /// runs to completion.
    pub fn new<F, N>(name: &str, main_loop: F) -> Thread<Q, R, T>
    where
        F: 'static + FnOnce(Rx<Q, R>) -> N + Send,
        N: 'static + Send + FnOnce() -> T,
        T: 'static + Send,
    {
        let (tx, rx) = mpsc::channel();
        Thread {
            name: name.to_string(),
            handle: Some(thread::spawn(main_loop(rx))),
            tx: Some(Tx::Unbounded(tx)),
        }
    }

    /// Spawn a stage fed by a bounded channel. Posting blocks once
    /// `chan_size` messages queue up; that blocking is the pipeline's
    /// back-pressure.
    pub fn new_sync<F, N>(name: &str, chan_size: usize, main_loop: F) -> Thread<Q, R, T>
    where
        F: 'static + FnOnce(Rx<Q, R>) -> N + Send,
        N: 'static + Send + FnOnce() -> T,
        T: 'static + Send,
    {
        let (tx, rx) = mpsc::sync_channel(chan_size);
        Thread {
            name: name.to_string(),
            handle: Some(thread::spawn(main_loop(rx))),
            tx: Some(Tx::Bounded(tx)),
        }
    }

    /// A sender clone for this stage.
    pub fn to_tx(&self) -> Tx<Q, R> {
        self.tx.as_ref().unwrap().clone()
    }

    /// Disconnect this stage's own sender and wait for the main
    /// loop's result.
    pub fn join(mut self) -> Result<T> {
        self.tx.take();
        match self.handle.take().unwrap().join() {
            Ok(val) => Ok(val),
            Err(err) => {
                err_at!(ThreadFail, msg: "stage {} panicked, {:?}", self.name, err)
            }
        }
    }
}

/// Sending side of a stage's input channel.
pub enum Tx<Q, R = ()> {
    Unbounded(mpsc::Sender<Msg<Q, R>>),
    Bounded(mpsc::SyncSender<Msg<Q, R>>),
}

impl<Q, R> Clone for Tx<Q, R> {
    fn clone(&self) -> Self {
        match self {
            Tx::Unbounded(tx) => Tx::Unbounded(tx.clone()),
            Tx::Bounded(tx) => Tx::Bounded(tx.clone()),
        }
    }
}

impl<Q, R> Tx<Q, R> {
    fn send(&self, msg: Msg<Q, R>) -> Result<()> {
        match self {
            Tx::Unbounded(tx) => err_at!(IPCFail, tx.send(msg)),
            Tx::Bounded(tx) => err_at!(IPCFail, tx.send(msg)),
        }
    }

    /// Fire-and-forget post into the stage.
    pub fn post(&self, msg: Q) -> Result<()> {
        self.send((msg, None))
    }

    /// Round trip: post and block for the stage's reply.
    pub fn request(&self, request: Q) -> Result<R> {
        let (rtx, rrx) = mpsc::channel();
        self.send((request, Some(rtx)))?;
        err_at!(IPCFail, rrx.recv())
    }
}

/// A set of identical stages behind one facade. Work is dispatched to
/// a random member; members share nothing, each runs the same main
/// loop over its own bounded channel.
pub struct Pool<Q, R = (), T = ()> {
    threads: Vec<Thread<Q, R, T>>,
}

impl<Q, R, T> Pool<Q, R, T> {
    /// Spawn `size` identical stages, each with its own bounded input
    /// channel of `chan_size`.
    pub fn new_sync<F, N>(name: &str, size: usize, chan_size: usize, main_loop: F) -> Pool<Q, R, T>
    where
        F: 'static + FnOnce(Rx<Q, R>) -> N + Send + Clone,
        N: 'static + Send + FnOnce() -> T,
        T: 'static + Send,
    {
        let mut threads = vec![];
        for i in 0..size {
            let name = format!("{}-{}", name, i);
            threads.push(Thread::new_sync(&name, chan_size, main_loop.clone()));
        }
        Pool { threads }
    }

    /// Post a message to one of the member stages.
    pub fn post(&self, msg: Q) -> Result<()> {
        let n: usize = rand::random::<usize>() % self.threads.len();
        self.threads[n].to_tx().post(msg)
    }

    /// Sender clones for every member, so producers can feed the pool
    /// without borrowing it.
    pub fn to_txs(&self) -> Vec<Tx<Q, R>> {
        self.threads.iter().map(|th| th.to_tx()).collect()
    }

    /// Disconnect every member and collect their results.
    pub fn close_wait(self) -> Result<Vec<T>> {
        let mut vals = vec![];
        for th in self.threads.into_iter() {
            vals.push(th.join()?);
        }
        Ok(vals)
    }
}
