//! Fixed-layout snapshot of a [`SessionStore`](super::SessionStore).
//!
//! All integers are big endian.
//!
//! ```text
//! header:   version u32 | rows u32 | columns u32 | record_size u32 | index_present u32
//! per row:  next_index u32 | total_count u64 | columns * record
//! record:   flags u8
//!           id_len u8 | id [32]
//!           peer_len u8 | peer [32]
//!           master_secret [48]
//!           cipher_suite u16 | protocol_version u16
//!           created_at u64 | timeout u32
//!           context_len u8 | context [32]
//!           ticket_len u16 | ticket [256]
//! per index row (if present):
//!           next_index u32 | total_count u64 | columns * (flags u8 | row u16 | column u16 | id_len u8 | id [32])
//! ```
//!
//! Heap tickets and peer certificate chains are not written. A session that
//! had a heap ticket comes back without it, still resumable by id.
//!
//! The snapshot contains master secrets in the clear.

use std::time::Duration;

use nom::bytes::complete::take;
use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::{be_u16, be_u32, be_u64, be_u8};
use nom::{Err, IResult};

use super::store::{IndexRow, SlotRef, Table};
use super::{
    AppContext, MasterSecret, PeerId, Session, SessionId, Ticket, ID_LEN, INLINE_TICKET_LEN,
    MAX_CONTEXT_LEN, PEER_ID_LEN, SECRET_LEN,
};
use crate::time::Timestamp;
use crate::types::{CipherSuite, ProtocolVersion};
use crate::Error;

const VERSION: u32 = 1;

const OCCUPIED: u8 = 0x01;
const HAS_PEER: u8 = 0x02;
const HAS_CONTEXT: u8 = 0x04;
const HAS_TICKET: u8 = 0x08;
const ALL_FLAGS: u8 = OCCUPIED | HAS_PEER | HAS_CONTEXT | HAS_TICKET;

/// Size of one session record.
const RECORD_SIZE: usize = 1
    + (1 + ID_LEN)
    + (1 + PEER_ID_LEN)
    + SECRET_LEN
    + 2
    + 2
    + 8
    + 4
    + (1 + MAX_CONTEXT_LEN)
    + 2
    + INLINE_TICKET_LEN;

const INDEX_ENTRY_SIZE: usize = 1 + 2 + 2 + (1 + ID_LEN);
const HEADER_SIZE: usize = 5 * 4;
const RING_SIZE: usize = 4 + 8;

#[derive(Debug, PartialEq, Eq)]
struct Header {
    version: u32,
    rows: u32,
    columns: u32,
    record_size: u32,
    index_present: u32,
}

pub(super) fn encode(table: &Table, columns: usize) -> Vec<u8> {
    let rows = table.rows.len();
    let mut size = HEADER_SIZE + rows * (RING_SIZE + columns * RECORD_SIZE);
    if table.index.is_some() {
        size += rows * (RING_SIZE + columns * INDEX_ENTRY_SIZE);
    }
    let mut out = Vec::with_capacity(size);

    out.extend_from_slice(&VERSION.to_be_bytes());
    out.extend_from_slice(&(rows as u32).to_be_bytes());
    out.extend_from_slice(&(columns as u32).to_be_bytes());
    out.extend_from_slice(&(RECORD_SIZE as u32).to_be_bytes());
    out.extend_from_slice(&(table.index.is_some() as u32).to_be_bytes());

    for row in &table.rows {
        out.extend_from_slice(&(row.next_index as u32).to_be_bytes());
        out.extend_from_slice(&row.total_count.to_be_bytes());
        for slot in &row.slots {
            let session = if slot.pending { None } else { slot.session.as_ref() };
            write_record(session, &mut out);
        }
    }

    if let Some(index) = &table.index {
        for row in index {
            out.extend_from_slice(&(row.next_index as u32).to_be_bytes());
            out.extend_from_slice(&row.total_count.to_be_bytes());
            for entry in &row.entries {
                match entry {
                    Some(e) => {
                        out.push(1);
                        out.extend_from_slice(&e.row.to_be_bytes());
                        out.extend_from_slice(&e.column.to_be_bytes());
                        let (id, len) = e.session_id.raw();
                        out.push(len as u8);
                        out.extend_from_slice(id);
                    }
                    None => out.extend_from_slice(&[0; INDEX_ENTRY_SIZE]),
                }
            }
        }
    }

    out
}

fn write_record(session: Option<&Session>, out: &mut Vec<u8>) {
    let start = out.len();

    let Some(s) = session else {
        out.resize(start + RECORD_SIZE, 0);
        return;
    };

    let inline_ticket = match &s.ticket {
        Some(Ticket::Inline(t)) => Some(t),
        _ => None,
    };

    let mut flags = OCCUPIED;
    if s.peer_id.is_some() {
        flags |= HAS_PEER;
    }
    if s.app_context.is_some() {
        flags |= HAS_CONTEXT;
    }
    if inline_ticket.is_some() {
        flags |= HAS_TICKET;
    }
    out.push(flags);

    let (id, len) = s.session_id.raw();
    out.push(len as u8);
    out.extend_from_slice(id);

    match &s.peer_id {
        Some(peer) => {
            let (peer, len) = peer.raw();
            out.push(len as u8);
            out.extend_from_slice(peer);
        }
        None => out.extend_from_slice(&[0; 1 + PEER_ID_LEN]),
    }

    out.extend_from_slice(s.master_secret.as_bytes());
    s.cipher_suite.serialize(out);
    s.protocol_version.serialize(out);
    out.extend_from_slice(&s.created_at.as_secs().to_be_bytes());
    out.extend_from_slice(&s.timeout.to_be_bytes());

    match &s.app_context {
        Some(ctx) => {
            let (ctx, len) = ctx.raw();
            out.push(len as u8);
            out.extend_from_slice(ctx);
        }
        None => out.extend_from_slice(&[0; 1 + MAX_CONTEXT_LEN]),
    }

    match inline_ticket {
        Some(t) => {
            out.extend_from_slice(&(t.len() as u16).to_be_bytes());
            out.extend_from_slice(t);
        }
        None => out.extend_from_slice(&[0; 2]),
    }

    out.resize(start + RECORD_SIZE, 0);
}

pub(super) fn decode(
    input: &[u8],
    rows: usize,
    columns: usize,
    peer_index: bool,
) -> Result<Table, Error> {
    let (mut input, header) =
        parse_header(input).map_err(|_| Error::InvalidSnapshot("Truncated header".into()))?;

    let running = Header {
        version: VERSION,
        rows: rows as u32,
        columns: columns as u32,
        record_size: RECORD_SIZE as u32,
        index_present: peer_index as u32,
    };

    if header != running {
        return Err(Error::SnapshotMismatch(format!(
            "snapshot {:?} does not match running {:?}",
            header, running
        )));
    }

    let mut table = Table::new(rows, columns, peer_index);

    for (r, row) in table.rows.iter_mut().enumerate() {
        input = read_ring(input, columns, r, &mut row.next_index, &mut row.total_count)?;

        for (c, slot) in row.slots.iter_mut().enumerate() {
            let (rest, session) = record(input).map_err(|_| {
                Error::InvalidSnapshot(format!("Bad record in row {} column {}", r, c))
            })?;
            input = rest;

            slot.ticket_len = session
                .as_ref()
                .and_then(|s| s.ticket.as_ref())
                .map(|t| t.len())
                .unwrap_or(0);
            slot.session = session;
        }
    }

    if let Some(index) = table.index.as_mut() {
        for (r, index_row) in index.iter_mut().enumerate() {
            input = read_index_row(input, rows, columns, r, index_row)?;
        }
    }

    if !input.is_empty() {
        return Err(Error::InvalidSnapshot(format!(
            "{} trailing bytes",
            input.len()
        )));
    }

    Ok(table)
}

fn parse_header(input: &[u8]) -> IResult<&[u8], Header> {
    let (input, version) = be_u32(input)?;
    let (input, rows) = be_u32(input)?;
    let (input, columns) = be_u32(input)?;
    let (input, record_size) = be_u32(input)?;
    let (input, index_present) = be_u32(input)?;

    Ok((
        input,
        Header {
            version,
            rows,
            columns,
            record_size,
            index_present,
        },
    ))
}

fn ring(input: &[u8]) -> IResult<&[u8], (u32, u64)> {
    let (input, next_index) = be_u32(input)?;
    let (input, total_count) = be_u64(input)?;
    Ok((input, (next_index, total_count)))
}

fn read_ring<'a>(
    input: &'a [u8],
    columns: usize,
    r: usize,
    next_index: &mut usize,
    total_count: &mut u64,
) -> Result<&'a [u8], Error> {
    let (rest, (next, total)) =
        ring(input).map_err(|_| Error::InvalidSnapshot(format!("Truncated row {}", r)))?;

    if next as usize >= columns {
        return Err(Error::InvalidSnapshot(format!(
            "Row {} cursor {} out of range",
            r, next
        )));
    }

    *next_index = next as usize;
    *total_count = total;
    Ok(rest)
}

fn read_index_row<'a>(
    mut input: &'a [u8],
    rows: usize,
    columns: usize,
    r: usize,
    index_row: &mut IndexRow,
) -> Result<&'a [u8], Error> {
    input = read_ring(
        input,
        columns,
        r,
        &mut index_row.next_index,
        &mut index_row.total_count,
    )?;

    for (c, entry) in index_row.entries.iter_mut().enumerate() {
        let bad = || Error::InvalidSnapshot(format!("Bad index entry in row {} column {}", r, c));

        let (rest, parsed) = slot_ref(input).map_err(|_| bad())?;
        if let Some(e) = parsed {
            if e.row as usize >= rows || e.column as usize >= columns {
                return Err(bad());
            }
        }

        *entry = parsed;
        input = rest;
    }

    Ok(input)
}

fn failure(input: &[u8]) -> Err<NomError<&[u8]>> {
    Err::Failure(NomError::new(input, ErrorKind::Verify))
}

/// Length-prefixed value in a fixed-width area.
fn padded(input: &[u8], width: usize) -> IResult<&[u8], &[u8]> {
    let (input, len) = be_u8(input)?;
    let (input, area) = take(width)(input)?;
    if len as usize > width {
        return Err(failure(input));
    }
    Ok((input, &area[..len as usize]))
}

fn record(input: &[u8]) -> IResult<&[u8], Option<Session>> {
    let (input, record) = take(RECORD_SIZE)(input)?;

    let (r, flags) = be_u8(record)?;
    if flags & !ALL_FLAGS != 0 {
        return Err(failure(r));
    }

    let (r, id) = padded(r, ID_LEN)?;
    let (r, peer) = padded(r, PEER_ID_LEN)?;
    let (r, secret) = take(SECRET_LEN)(r)?;
    let (r, cipher_suite) = CipherSuite::parse(r)?;
    let (r, protocol_version) = ProtocolVersion::parse(r)?;
    let (r, created_at) = be_u64(r)?;
    let (r, timeout) = be_u32(r)?;
    let (r, context) = padded(r, MAX_CONTEXT_LEN)?;
    let (r, ticket_len) = be_u16(r)?;
    let (r, ticket_area) = take(INLINE_TICKET_LEN)(r)?;

    if flags & OCCUPIED == 0 {
        if flags != 0 {
            return Err(failure(r));
        }
        return Ok((input, None));
    }

    let id = SessionId::try_new(id).map_err(|_| failure(r))?;
    let secret = MasterSecret::try_from_slice(secret).map_err(|_| failure(r))?;

    let mut session = Session::new(
        id,
        secret,
        cipher_suite,
        protocol_version,
        Timestamp::from_secs(created_at),
        Duration::from_secs(timeout as u64),
    );

    if flags & HAS_PEER != 0 {
        session.peer_id = Some(PeerId::try_new(peer).map_err(|_| failure(r))?);
    }

    if flags & HAS_CONTEXT != 0 {
        session.app_context = Some(AppContext::try_new(context).map_err(|_| failure(r))?);
    }

    if flags & HAS_TICKET != 0 {
        let len = ticket_len as usize;
        if len > INLINE_TICKET_LEN {
            return Err(failure(r));
        }
        session.ticket = Some(Ticket::from_slice(&ticket_area[..len]).map_err(|_| failure(r))?);
    }

    Ok((input, Some(session)))
}

fn slot_ref(input: &[u8]) -> IResult<&[u8], Option<SlotRef>> {
    let (input, flags) = be_u8(input)?;
    let (input, row) = be_u16(input)?;
    let (input, column) = be_u16(input)?;
    let (input, id) = padded(input, ID_LEN)?;

    match flags {
        0 => Ok((input, None)),
        1 => {
            let session_id = SessionId::try_new(id).map_err(|_| failure(input))?;
            Ok((
                input,
                Some(SlotRef {
                    row,
                    column,
                    session_id,
                }),
            ))
        }
        _ => Err(failure(input)),
    }
}
