//! Fixed-capacity session cache shared by every connection of a context.
//!
//! The store is `RowCount` rows of `ColumnCount` slots. A session id picks a
//! row, and inside the row the slots form a ring: an insert always takes the
//! slot under the cursor and advances it, whatever that slot holds. There is
//! no LRU and no sweep. An expired session stays in its slot until the cursor
//! wraps onto it.
//!
//! One mutex guards the whole table. The only work done outside it is the
//! allocation of heap-sized tickets, which happens in two phases:
//!
//! 1. Under the lock, the slot is claimed: the fixed fields are written, the
//!    slot is marked pending and gets a fresh generation. Until the commit,
//!    lookups of that id report a miss, even if an older insert of it is
//!    still in the row.
//! 2. The ticket buffer is allocated and filled without the lock.
//! 3. Under a second short lock the generation and ticket length are checked
//!    again before the buffer is committed. If another insert took over the
//!    slot in between, the commit fails with [`Error::ConcurrentModification`].
//!
//! Lookups copying out a heap ticket use the same pattern. A lookup that
//! loses the race reports a miss.
//!
//! The optional peer index maps a [`PeerId`] to `(row, column)` positions in
//! the primary table. Entries are never trusted: every dereference checks that
//! the slot still holds a session with the same id and peer.

use std::sync::Mutex;

use super::{heap_copy, stable_hash, PeerId, Session, SessionId, Ticket};
use crate::time::Timestamp;
use crate::Error;

/// Occupancy counters of a [`SessionStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Number of slots, `rows * columns`.
    pub capacity: usize,
    /// Slots holding a session, expired or not.
    pub occupied: usize,
    /// Slots holding a session that has not expired.
    pub active: usize,
    /// Inserts committed since creation, import or clear.
    pub inserts: u64,
}

#[derive(Debug, Default)]
pub(super) struct Slot {
    pub(super) session: Option<Session>,
    pub(super) generation: u64,
    pub(super) pending: bool,
    pub(super) ticket_len: usize,
}

impl Slot {
    fn visible(&self) -> Option<&Session> {
        if self.pending {
            return None;
        }
        self.session.as_ref()
    }
}

#[derive(Debug)]
pub(super) struct Row {
    pub(super) slots: Vec<Slot>,
    pub(super) next_index: usize,
    pub(super) total_count: u64,
}

impl Row {
    fn new(columns: usize) -> Row {
        Row {
            slots: (0..columns).map(|_| Slot::default()).collect(),
            next_index: 0,
            total_count: 0,
        }
    }

    /// Column of the most recent insert of this id. The slot may still be
    /// pending, in which case older inserts of the id are shadowed by it.
    fn find(&self, id: &SessionId) -> Option<usize> {
        recent_first(self.next_index, self.total_count, self.slots.len()).find(|c| {
            self.slots[*c]
                .session
                .as_ref()
                .map(|s| s.session_id == *id)
                .unwrap_or(false)
        })
    }
}

/// Back-reference from the peer index into the primary table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct SlotRef {
    pub(super) row: u16,
    pub(super) column: u16,
    pub(super) session_id: SessionId,
}

#[derive(Debug)]
pub(super) struct IndexRow {
    pub(super) entries: Vec<Option<SlotRef>>,
    pub(super) next_index: usize,
    pub(super) total_count: u64,
}

impl IndexRow {
    fn new(columns: usize) -> IndexRow {
        IndexRow {
            entries: vec![None; columns],
            next_index: 0,
            total_count: 0,
        }
    }
}

#[derive(Debug)]
pub(super) struct Table {
    pub(super) rows: Vec<Row>,
    pub(super) index: Option<Vec<IndexRow>>,
    pub(super) inserts: u64,
    pub(super) generation: u64,
}

impl Table {
    pub(super) fn new(rows: usize, columns: usize, peer_index: bool) -> Table {
        Table {
            rows: (0..rows).map(|_| Row::new(columns)).collect(),
            index: peer_index.then(|| (0..rows).map(|_| IndexRow::new(columns)).collect()),
            inserts: 0,
            generation: 0,
        }
    }

    /// Write `session` under the ring cursor of `row`. Returns the column and
    /// the slot's new generation.
    fn place(&mut self, row: usize, session: Session, pending: bool, ticket_len: usize) -> (usize, u64) {
        self.generation += 1;
        let generation = self.generation;

        let r = &mut self.rows[row];
        let column = r.next_index;
        let slot = &mut r.slots[column];

        if let Some(old) = slot.visible() {
            debug!(
                "Overwriting {} in row {} column {}",
                old.session_id, row, column
            );
        }

        *slot = Slot {
            session: Some(session),
            generation,
            pending,
            ticket_len,
        };

        r.next_index = (column + 1) % r.slots.len();
        r.total_count += 1;

        (column, generation)
    }

    /// Point the peer index at `(row, column)`. An existing entry for the
    /// same peer is updated in place, otherwise the entry goes under the
    /// index ring cursor.
    fn index(&mut self, row: usize, column: usize, peer: &PeerId, session_id: SessionId) {
        let Table { rows, index, .. } = self;
        let rows: &[Row] = rows;
        let Some(index) = index.as_mut() else {
            return;
        };

        let irow = stable_hash(peer) as usize % index.len();
        let index_row = &mut index[irow];
        let entry = SlotRef {
            row: row as u16,
            column: column as u16,
            session_id,
        };

        let existing = index_row
            .entries
            .iter()
            .position(|e| e.map(|e| resolve(rows, e, peer).is_some()).unwrap_or(false));

        match existing {
            Some(pos) => index_row.entries[pos] = Some(entry),
            None => {
                let pos = index_row.next_index;
                index_row.entries[pos] = Some(entry);
                index_row.next_index = (pos + 1) % index_row.entries.len();
                index_row.total_count += 1;
            }
        }
    }
}

/// The session an index entry points at, if it still belongs to `peer`.
fn resolve<'a>(rows: &'a [Row], entry: SlotRef, peer: &PeerId) -> Option<&'a Session> {
    let slot = rows
        .get(entry.row as usize)?
        .slots
        .get(entry.column as usize)?;
    let session = slot.visible()?;

    if session.session_id != entry.session_id {
        return None;
    }
    if session.peer_id.as_ref() != Some(peer) {
        return None;
    }

    Some(session)
}

/// Columns of a ring in most-recently-written-first order.
fn recent_first(next_index: usize, total_count: u64, columns: usize) -> impl Iterator<Item = usize> {
    let n = total_count.min(columns as u64) as usize;
    (0..n).map(move |i| (next_index + columns - 1 - i) % columns)
}

/// Slot claimed by the first phase of a heap-ticket insert.
#[derive(Debug)]
pub(crate) struct Claim {
    row: usize,
    column: usize,
    generation: u64,
    ticket_len: usize,
    peer_id: Option<PeerId>,
    session_id: SessionId,
}

/// Outcome of the locked part of a lookup.
#[derive(Debug)]
pub(crate) enum Copied {
    Miss,
    Done(Session),
    /// The ticket lives on the heap and still has to be copied.
    NeedsTicket {
        session: Session,
        row: usize,
        column: usize,
        generation: u64,
        len: usize,
    },
}

/// The session cache.
///
/// See the [module docs](self) for the slot layout and locking.
#[derive(Debug)]
pub struct SessionStore {
    rows: usize,
    columns: usize,
    peer_index: bool,
    table: Mutex<Table>,
}

impl SessionStore {
    /// Create an empty store.
    ///
    /// `peer_index` enables [`lookup_by_peer`](Self::lookup_by_peer).
    pub fn new(rows: usize, columns: usize, peer_index: bool) -> Result<SessionStore, Error> {
        let max = u16::MAX as usize;
        if rows == 0 || columns == 0 || rows > max || columns > max {
            return Err(Error::ConfigError(format!(
                "Session store dimensions out of range: {}x{}",
                rows, columns
            )));
        }

        Ok(SessionStore {
            rows,
            columns,
            peer_index,
            table: Mutex::new(Table::new(rows, columns, peer_index)),
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn has_peer_index(&self) -> bool {
        self.peer_index
    }

    fn row_of(&self, id: &[u8]) -> usize {
        stable_hash(id) as usize % self.rows
    }

    /// Most recent session stored under `id`, unless it has expired.
    ///
    /// Only the most recent insert of an id is considered. If that one has
    /// expired the result is `None`, even when an older insert is still valid.
    pub fn lookup_by_id(&self, id: &SessionId, now: Timestamp) -> Result<Option<Session>, Error> {
        let copied = self.copy_by_id(id, now)?;
        self.finish_copy(copied)
    }

    /// Most recent session remembered for `peer`, unless it has expired.
    ///
    /// Index entries whose slot has since been overwritten are skipped.
    pub fn lookup_by_peer(&self, peer: &PeerId, now: Timestamp) -> Result<Option<Session>, Error> {
        let copied = {
            let table = self.table.lock()?;
            let Some(index) = table.index.as_ref() else {
                return Ok(None);
            };

            let index_row = &index[self.row_of(peer)];
            let columns = index_row.entries.len();

            let hit = recent_first(index_row.next_index, index_row.total_count, columns)
                .filter_map(|c| index_row.entries[c])
                .find_map(|e| resolve(&table.rows, e, peer).map(|s| (e, s)));

            match hit {
                None => Copied::Miss,
                Some((e, session)) => {
                    if session.is_expired(now) {
                        debug!("Session for {} expired at {}", peer, session.expires_at());
                        Copied::Miss
                    } else {
                        let slot = &table.rows[e.row as usize].slots[e.column as usize];
                        copy_locked(session, e.row as usize, e.column as usize, slot.generation)
                    }
                }
            }
        };

        self.finish_copy(copied)
    }

    /// Locked part of [`lookup_by_id`](Self::lookup_by_id).
    pub(crate) fn copy_by_id(&self, id: &SessionId, now: Timestamp) -> Result<Copied, Error> {
        if id.is_empty() {
            return Ok(Copied::Miss);
        }

        let row = self.row_of(id);
        let table = self.table.lock()?;
        let r = &table.rows[row];

        let Some(column) = r.find(id) else {
            return Ok(Copied::Miss);
        };
        let slot = &r.slots[column];
        let Some(session) = slot.visible() else {
            debug!("Session {} is still being inserted", id);
            return Ok(Copied::Miss);
        };

        if session.is_expired(now) {
            debug!("Session {} expired at {}", id, session.expires_at());
            return Ok(Copied::Miss);
        }

        Ok(copy_locked(session, row, column, slot.generation))
    }

    /// Copy a heap ticket out of the store, then attach it under a second lock.
    pub(crate) fn finish_copy(&self, copied: Copied) -> Result<Option<Session>, Error> {
        let (mut session, row, column, generation, len) = match copied {
            Copied::Miss => return Ok(None),
            Copied::Done(session) => return Ok(Some(session)),
            Copied::NeedsTicket {
                session,
                row,
                column,
                generation,
                len,
            } => (session, row, column, generation, len),
        };

        let mut buf = Vec::new();
        if buf.try_reserve_exact(len).is_err() {
            debug!(
                "No memory to copy {} byte ticket of {}, treating as miss",
                len, session.session_id
            );
            return Ok(None);
        }

        let table = self.table.lock()?;
        let slot = &table.rows[row].slots[column];

        let ticket = match slot.visible().and_then(|s| s.ticket.as_ref()) {
            Some(Ticket::Heap(t)) if slot.generation == generation && t.len() == len => t,
            _ => {
                debug!(
                    "Slot {}/{} changed while copying {}, treating as miss",
                    row, column, session.session_id
                );
                return Ok(None);
            }
        };

        buf.extend_from_slice(ticket);
        session.ticket = Some(Ticket::Heap(buf.into_boxed_slice()));

        Ok(Some(session))
    }

    /// Publish a copy of `session`.
    ///
    /// The store never keeps a reference to the caller's ticket buffer.
    /// Fails with [`Error::ConcurrentModification`] if the slot was taken
    /// over while a heap ticket was being copied; the session is then not
    /// cached.
    pub fn insert(&self, session: &Session) -> Result<(), Error> {
        if let Some(Ticket::Heap(data)) = &session.ticket {
            let claim = self.claim(session)?;

            let buf = match heap_copy(data) {
                Ok(buf) => buf,
                Err(e) => {
                    self.abandon(&claim)?;
                    return Err(e);
                }
            };

            return self.commit(claim, buf);
        }

        let row = self.row_of(&session.session_id);
        let mut table = self.table.lock()?;

        let copy = session.clone();
        let ticket_len = copy.ticket.as_ref().map(|t| t.len()).unwrap_or(0);
        let (column, _) = table.place(row, copy, false, ticket_len);
        table.inserts += 1;

        if let Some(peer) = &session.peer_id {
            table.index(row, column, peer, session.session_id);
        }

        debug!("Inserted {} into row {} column {}", session.session_id, row, column);

        Ok(())
    }

    /// First phase of a heap-ticket insert: write the fixed fields into the
    /// next slot and hide it from lookups.
    pub(crate) fn claim(&self, session: &Session) -> Result<Claim, Error> {
        let row = self.row_of(&session.session_id);
        let ticket_len = session.ticket.as_ref().map(|t| t.len()).unwrap_or(0);

        let mut table = self.table.lock()?;
        let copy = session.clone_without_ticket();
        let (column, generation) = table.place(row, copy, true, ticket_len);

        trace!(
            "Claimed row {} column {} generation {} for {}",
            row,
            column,
            generation,
            session.session_id
        );

        Ok(Claim {
            row,
            column,
            generation,
            ticket_len,
            peer_id: session.peer_id,
            session_id: session.session_id,
        })
    }

    /// Second phase of a heap-ticket insert.
    pub(crate) fn commit(&self, claim: Claim, ticket: Box<[u8]>) -> Result<(), Error> {
        let mut table = self.table.lock()?;
        let slot = &mut table.rows[claim.row].slots[claim.column];

        if !slot.pending
            || slot.generation != claim.generation
            || slot.ticket_len != claim.ticket_len
            || ticket.len() != claim.ticket_len
        {
            debug!(
                "Slot {}/{} modified before commit of generation {}",
                claim.row, claim.column, claim.generation
            );
            return Err(Error::ConcurrentModification);
        }

        let Some(session) = slot.session.as_mut() else {
            return Err(Error::ConcurrentModification);
        };
        session.ticket = Some(Ticket::Heap(ticket));
        slot.pending = false;
        table.inserts += 1;

        if let Some(peer) = &claim.peer_id {
            table.index(claim.row, claim.column, peer, claim.session_id);
        }

        debug!(
            "Inserted heap ticket session into row {} column {}",
            claim.row, claim.column
        );

        Ok(())
    }

    /// Drop a claim whose ticket could not be allocated.
    fn abandon(&self, claim: &Claim) -> Result<(), Error> {
        let mut table = self.table.lock()?;
        let slot = &mut table.rows[claim.row].slots[claim.column];
        if slot.pending && slot.generation == claim.generation {
            *slot = Slot {
                generation: slot.generation,
                ..Slot::default()
            };
        }
        Ok(())
    }

    /// Replace the ticket of the most recent session stored under `id`.
    ///
    /// Returns `false` if no such session is cached. The slot gets a new
    /// generation, so concurrent copies of the old ticket turn into misses.
    pub fn update_ticket(&self, id: &SessionId, ticket: &[u8]) -> Result<bool, Error> {
        let ticket = Ticket::from_slice(ticket)?;
        let row = self.row_of(id);

        let mut table = self.table.lock()?;
        table.generation += 1;
        let generation = table.generation;

        let r = &mut table.rows[row];
        let Some(column) = r.find(id) else {
            return Ok(false);
        };
        let slot = &mut r.slots[column];
        if slot.pending {
            return Ok(false);
        }
        let Some(session) = slot.session.as_mut() else {
            return Ok(false);
        };

        slot.ticket_len = ticket.len();
        slot.generation = generation;
        session.ticket = Some(ticket);

        Ok(true)
    }

    /// Occupancy at `now`.
    pub fn stats(&self, now: Timestamp) -> Result<CacheStats, Error> {
        let table = self.table.lock()?;
        let mut stats = CacheStats {
            capacity: self.rows * self.columns,
            inserts: table.inserts,
            ..Default::default()
        };

        for session in table.rows.iter().flat_map(|r| r.slots.iter()).filter_map(Slot::visible) {
            stats.occupied += 1;
            if !session.is_expired(now) {
                stats.active += 1;
            }
        }

        Ok(stats)
    }

    /// Empty every slot. Master secrets are wiped as the sessions drop.
    pub fn clear(&self) -> Result<(), Error> {
        let mut table = self.table.lock()?;
        let generation = table.generation + 1;
        let mut fresh = Table::new(self.rows, self.columns, self.peer_index);
        fresh.generation = generation;
        *table = fresh;
        debug!("Cleared session store");
        Ok(())
    }

    /// Serialize the whole table. See [`Context::export_store`](crate::Context::export_store).
    pub fn export(&self) -> Result<Vec<u8>, Error> {
        let table = self.table.lock()?;
        let out = super::snapshot::encode(&table, self.columns);
        debug!("Exported session store, {} bytes", out.len());
        Ok(out)
    }

    /// Replace the whole table with a snapshot.
    pub fn import(&self, snapshot: &[u8]) -> Result<(), Error> {
        let mut fresh = super::snapshot::decode(snapshot, self.rows, self.columns, self.peer_index)?;

        let mut table = self.table.lock()?;
        // Outstanding claims and copies must not match any restored slot.
        let generation = table.generation + 1;
        for slot in fresh.rows.iter_mut().flat_map(|r| r.slots.iter_mut()) {
            slot.generation = generation;
        }
        fresh.generation = generation;
        *table = fresh;

        debug!("Imported session store snapshot");
        Ok(())
    }
}

fn copy_locked(session: &Session, row: usize, column: usize, generation: u64) -> Copied {
    match &session.ticket {
        Some(Ticket::Heap(t)) => Copied::NeedsTicket {
            session: session.clone_without_ticket(),
            row,
            column,
            generation,
            len: t.len(),
        },
        _ => Copied::Done(session.clone()),
    }
}
