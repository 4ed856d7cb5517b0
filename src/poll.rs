//! Poll registry (§4.2): bookkeeping layered over `mio::Poll` that maps
//! descriptors to their registered token and lets the server's housekeeping
//! walk all currently-registered tokens without probing the OS state.
//!
//! Token identifiers are drawn from a free-list allocator (§4.2) so a
//! long-lived server recycles token numbers instead of letting the space
//! grow unbounded under connection churn.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};

/// Hands out `Token`s from a reusable pool; releasing one pushes it back
/// onto the free list instead of retiring it.
pub struct TokenAllocator {
    next: usize,
    free: Vec<usize>,
}

impl TokenAllocator {
    pub fn starting_at(first: usize) -> Self {
        Self {
            next: first,
            free: Vec::new(),
        }
    }

    pub fn allocate(&mut self) -> Token {
        if let Some(reused) = self.free.pop() {
            Token(reused)
        } else {
            let t = self.next;
            self.next += 1;
            Token(t)
        }
    }

    pub fn release(&mut self, token: Token) {
        self.free.push(token.0);
    }
}

/// The registered set of descriptors with O(1) add/remove via swap-pop,
/// wrapping a single shared `mio::Poll` instance (§4.2, §5).
pub struct PollRegistry {
    poll: Poll,
    slots: Vec<Token>,
    index: HashMap<Token, usize>,
}

impl PollRegistry {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            slots: Vec::new(),
            index: HashMap::new(),
        })
    }

    pub fn registry(&self) -> &mio::Registry {
        self.poll.registry()
    }

    pub fn register<S: Source + ?Sized>(
        &mut self,
        source: &mut S,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.poll.registry().register(source, token, interests)?;
        self.index.insert(token, self.slots.len());
        self.slots.push(token);
        Ok(())
    }

    pub fn reregister<S: Source + ?Sized>(
        &self,
        source: &mut S,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.poll.registry().reregister(source, token, interests)
    }

    /// Deregisters `source` and removes `token` from the bookkeeping set by
    /// swapping it with the last slot, then popping (§4.2).
    pub fn deregister<S: Source + ?Sized>(&mut self, source: &mut S, token: Token) -> io::Result<()> {
        let _ = self.poll.registry().deregister(source);
        if let Some(&pos) = self.index.get(&token) {
            let last = self.slots.len() - 1;
            self.slots.swap(pos, last);
            self.index.insert(self.slots[pos], pos);
            self.slots.pop();
            self.index.remove(&token);
        }
        Ok(())
    }

    pub fn registered_count(&self) -> usize {
        self.slots.len()
    }

    pub fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        self.poll.poll(events, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_reuses_released_tokens() {
        let mut alloc = TokenAllocator::starting_at(10);
        let a = alloc.allocate();
        let b = alloc.allocate();
        assert_eq!(a, Token(10));
        assert_eq!(b, Token(11));
        alloc.release(a);
        let c = alloc.allocate();
        assert_eq!(c, Token(10));
    }

    #[test]
    fn allocator_keeps_growing_when_nothing_released() {
        let mut alloc = TokenAllocator::starting_at(0);
        let tokens: Vec<_> = (0..5).map(|_| alloc.allocate()).collect();
        assert_eq!(tokens, vec![Token(0), Token(1), Token(2), Token(3), Token(4)]);
    }
}
