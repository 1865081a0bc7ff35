// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The static-allocation IPC broker.
//!
//! Channels live in a fixed table; messages come from a fixed pool shared by
//! all channels and tracked with a bitmap. A channel's queue is a singly
//! linked list of pool indices, bounded by [`abi::CHANNEL_MAX_DEPTH`].
//! Nothing here blocks: a receive on an empty queue reports `Busy` and the
//! caller decides what to do about it.
//!
//! # Invariants
//!
//! - A pool slot is either free in the bitmap or linked into exactly one
//!   channel queue.
//! - `depth` equals the length of the queue's linked list.
//! - `free_messages() + sum(depth)` equals [`abi::MAX_MESSAGES`] at every
//!   observable point.
//! - Only the channel's owner may receive or close.

use abi::{
    ChannelPerms, ChannelStats, Error, Pid, CHANNEL_MAX_DEPTH, MAX_CHANNELS,
    MAX_MESSAGES, MAX_MESSAGE_SIZE,
};

/// Payload classes carried in a message header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum MessageKind {
    Data = 0,
    Signal = 1,
    Interrupt = 2,
    Syscall = 3,
}

/// One pool-resident message. Whether a slot is live is recorded in the pool
/// bitmap, not in the message itself.
#[derive(Debug)]
struct Message {
    sender: Pid,
    receiver: Pid,
    kind: MessageKind,
    len: u16,
    data: [u8; MAX_MESSAGE_SIZE],
    next: Option<u8>,
}

impl Message {
    const EMPTY: Message = Message {
        sender: Pid(0),
        receiver: Pid(0),
        kind: MessageKind::Data,
        len: 0,
        data: [0; MAX_MESSAGE_SIZE],
        next: None,
    };
}

/// One channel table entry.
#[derive(Debug)]
struct Channel {
    id: u32,
    owner: Pid,
    perms: ChannelPerms,
    head: Option<u8>,
    tail: Option<u8>,
    depth: u32,
    max_depth: u32,
}

/// The broker: channel table plus message pool.
pub struct IpcBroker {
    channels: [Option<Channel>; MAX_CHANNELS],
    next_id: u32,
    pool: [Message; MAX_MESSAGES],
    /// Bit set means the corresponding pool slot is in use.
    pool_bitmap: u32,
}

impl IpcBroker {
    pub(crate) fn new() -> Self {
        Self {
            channels: core::array::from_fn(|_| None),
            next_id: 1,
            pool: core::array::from_fn(|_| Message::EMPTY),
            pool_bitmap: 0,
        }
    }

    /// Creates a channel owned by `owner`. Returns the new channel id, or 0
    /// when the table is full -- channel ids start at 1, so 0 is never
    /// valid.
    pub fn create_channel(&mut self, owner: Pid, perms: ChannelPerms) -> u32 {
        let Some(slot) = self.channels.iter().position(|c| c.is_none()) else {
            return 0;
        };
        let id = self.next_id;
        self.next_id += 1;
        self.channels[slot] = Some(Channel {
            id,
            owner,
            perms,
            head: None,
            tail: None,
            depth: 0,
            max_depth: CHANNEL_MAX_DEPTH,
        });
        id
    }

    fn channel_index(&self, id: u32) -> Result<usize, Error> {
        self.channels
            .iter()
            .position(|c| c.as_ref().map(|c| c.id) == Some(id))
            .ok_or(Error::NoEnt)
    }

    /// Re-borrows a channel by index. The index must have come from
    /// `channel_index` on the current table state.
    fn chan(&self, ci: usize) -> &Channel {
        self.channels[ci].as_ref().expect("stale channel index")
    }

    fn chan_mut(&mut self, ci: usize) -> &mut Channel {
        self.channels[ci].as_mut().expect("stale channel index")
    }

    fn alloc_message(&mut self) -> Option<u8> {
        let free = (!self.pool_bitmap).trailing_zeros();
        if free as usize >= MAX_MESSAGES {
            return None;
        }
        self.pool_bitmap |= 1 << free;
        Some(free as u8)
    }

    fn free_message(&mut self, index: u8) {
        self.pool_bitmap &= !(1 << u32::from(index));
        self.pool[usize::from(index)].next = None;
    }

    /// Queues `payload` on a channel.
    ///
    /// Error order follows the validation order: argument checks, channel
    /// lookup, permission, queue bound, pool capacity.
    pub fn send(
        &mut self,
        channel_id: u32,
        sender: Pid,
        payload: &[u8],
    ) -> Result<(), Error> {
        if payload.is_empty() || payload.len() > MAX_MESSAGE_SIZE {
            return Err(Error::Inval);
        }
        let ci = self.channel_index(channel_id)?;
        let ch = self.chan(ci);
        if !ch.perms.contains(ChannelPerms::WRITE) {
            return Err(Error::Acces);
        }
        if ch.depth >= ch.max_depth {
            return Err(Error::Busy);
        }
        let receiver = ch.owner;
        let old_tail = ch.tail;
        let Some(mi) = self.alloc_message() else {
            return Err(Error::NoMem);
        };

        let msg = &mut self.pool[usize::from(mi)];
        msg.sender = sender;
        msg.receiver = receiver;
        msg.kind = MessageKind::Data;
        msg.len = payload.len() as u16;
        msg.data[..payload.len()].copy_from_slice(payload);
        msg.next = None;

        match old_tail {
            Some(t) => self.pool[usize::from(t)].next = Some(mi),
            None => self.chan_mut(ci).head = Some(mi),
        }
        let ch = self.chan_mut(ci);
        ch.tail = Some(mi);
        ch.depth += 1;
        Ok(())
    }

    /// Dequeues the oldest message into `buf`.
    ///
    /// Only the owner may receive. Copies at most `buf.len()` bytes and
    /// returns the full payload length, so a caller with a short buffer can
    /// tell it was truncated. An empty queue reports `Busy`; this core
    /// never suspends the caller.
    pub fn receive(
        &mut self,
        channel_id: u32,
        receiver: Pid,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let ci = self.channel_index(channel_id)?;
        let ch = self.chan(ci);
        if ch.owner != receiver {
            return Err(Error::Acces);
        }
        let Some(mi) = ch.head else {
            return Err(Error::Busy);
        };
        // Queued messages are addressed to the owner at send time, and only
        // the owner gets here.
        uassert!(self.pool[usize::from(mi)].receiver == receiver);

        let next = self.pool[usize::from(mi)].next;
        let ch = self.chan_mut(ci);
        ch.head = next;
        if ch.head.is_none() {
            ch.tail = None;
        }
        ch.depth -= 1;

        let msg = &self.pool[usize::from(mi)];
        let full_len = usize::from(msg.len);
        let n = full_len.min(buf.len());
        buf[..n].copy_from_slice(&msg.data[..n]);
        self.free_message(mi);
        Ok(full_len)
    }

    /// Closes a channel, releasing every queued message back to the pool.
    /// Only the owner may close.
    pub fn close(&mut self, channel_id: u32, requester: Pid) -> Result<(), Error> {
        let ci = self.channel_index(channel_id)?;
        let ch = self.chan(ci);
        if ch.owner != requester {
            return Err(Error::Acces);
        }
        let mut cursor = ch.head;
        while let Some(mi) = cursor {
            cursor = self.pool[usize::from(mi)].next;
            self.free_message(mi);
        }
        self.channels[ci] = None;
        Ok(())
    }

    /// Looks at the head of a channel's queue without dequeuing: sender,
    /// payload class, and payload length. `None` when the queue is empty.
    pub fn peek(
        &self,
        channel_id: u32,
    ) -> Result<Option<(Pid, MessageKind, usize)>, Error> {
        let ci = self.channel_index(channel_id)?;
        let ch = self.chan(ci);
        Ok(ch.head.map(|mi| {
            let msg = &self.pool[usize::from(mi)];
            (msg.sender, msg.kind, usize::from(msg.len))
        }))
    }

    /// Point-in-time statistics for one channel.
    pub fn stats(&self, channel_id: u32) -> Result<ChannelStats, Error> {
        let ci = self.channel_index(channel_id)?;
        let ch = self.chan(ci);
        Ok(ChannelStats {
            id: ch.id,
            owner: ch.owner,
            depth: ch.depth,
            max_depth: ch.max_depth,
            live_channels: self.channels.iter().flatten().count() as u32,
        })
    }

    /// Queue depth of one channel.
    pub fn depth(&self, channel_id: u32) -> Result<u32, Error> {
        let ci = self.channel_index(channel_id)?;
        Ok(self.chan(ci).depth)
    }

    /// Messages currently free in the pool.
    pub fn free_messages(&self) -> u32 {
        MAX_MESSAGES as u32 - self.pool_bitmap.count_ones()
    }
}
