//! Runtime stack of active cross-boundary calls.
//!
//! Frames are kept per OS thread: the top of the calling thread's list is the
//! logical caller of the next dispatch. A frame is popped when its guard drops,
//! so every exit path of a call, error or not, unwinds the stack.

use std::{
    collections::HashMap,
    thread::{self, ThreadId},
};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{Error, Result};

/// Caller recorded for calls issued by the host program itself.
pub const HOST: &str = "host";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub caller: String,
    pub callee: String,
    pub function: String,
    /// 1-based depth on the owning thread.
    pub depth: usize,
}

#[derive(Debug)]
pub struct RuntimeStack {
    threads: Mutex<HashMap<ThreadId, Vec<Frame>>>,
    limit: usize,
}

impl RuntimeStack {
    pub fn new(limit: usize) -> Self {
        RuntimeStack {
            threads: Mutex::new(HashMap::new()),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Drops every recorded frame.
    pub fn reset(&self) {
        self.threads.lock().clear();
    }

    /// Pushes a frame for the calling thread.
    pub fn push(&self, callee: &str, function: &str) -> Result<FrameGuard<'_>> {
        let id = thread::current().id();
        let mut threads = self.threads.lock();
        let frames = threads.entry(id).or_default();

        let depth = frames.len() + 1;
        if depth > self.limit {
            if frames.is_empty() {
                threads.remove(&id);
            }
            return Err(Error::StackOverflow {
                depth,
                limit: self.limit,
            });
        }

        let caller = frames
            .last()
            .map_or_else(|| HOST.to_string(), |top| top.callee.clone());
        frames.push(Frame {
            caller,
            callee: callee.to_string(),
            function: function.to_string(),
            depth,
        });
        Ok(FrameGuard { stack: self, id })
    }

    fn pop(&self, id: ThreadId) {
        let mut threads = self.threads.lock();
        if let Some(frames) = threads.get_mut(&id) {
            frames.pop();
            if frames.is_empty() {
                threads.remove(&id);
            }
        }
    }

    /// Depth of the calling thread.
    pub fn depth(&self) -> usize {
        let id = thread::current().id();
        self.threads.lock().get(&id).map_or(0, Vec::len)
    }

    /// Top frame of the calling thread.
    pub fn current(&self) -> Option<Frame> {
        let id = thread::current().id();
        self.threads
            .lock()
            .get(&id)
            .and_then(|frames| frames.last().cloned())
    }

    /// Frames of the calling thread, outermost first.
    pub fn frames(&self) -> Vec<Frame> {
        let id = thread::current().id();
        self.threads.lock().get(&id).cloned().unwrap_or_default()
    }

    /// Frames on any thread whose callee is `tag`.
    pub fn active(&self, tag: &str) -> usize {
        self.threads
            .lock()
            .values()
            .flatten()
            .filter(|frame| frame.callee == tag)
            .count()
    }

    /// Frames across all threads.
    pub fn len(&self) -> usize {
        self.threads.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pops its frame on drop.
#[must_use = "dropping the guard pops the frame immediately"]
pub struct FrameGuard<'a> {
    stack: &'a RuntimeStack,
    id: ThreadId,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.stack.pop(self.id);
    }
}
