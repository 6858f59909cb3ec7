/// Trip history transfer and reconstruction
///
/// The scooter streams its trip log on the trips characteristic after a
/// request byte is written to it. Each record is either a trip start
/// (second byte 0) or a trip end (second byte non-zero), keyed by the trip
/// index in the first byte. A single byte `4` terminates the transfer.
use futures_util::{Stream, StreamExt};
use log::{debug, info, warn};
use std::collections::{btree_map, BTreeMap, BTreeSet, HashMap};

use crate::bluetooth::characteristic::Characteristic;
use crate::bluetooth::peripheral::{ConnectionState, Peripheral};
use crate::error::{DecodeError, PeripheralError};
use crate::models::Trip;
use crate::protocol::{decode_trip_end, decode_trip_start, trip_history_request};
use crate::utils::hex_frame;

const END_OF_TRIPS: u8 = 4;

/// Trips keyed by their slot index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripTable(BTreeMap<u8, Trip>);

impl TripTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: u8) -> Option<&Trip> {
        self.0.get(&index)
    }

    pub fn insert(&mut self, trip: Trip) {
        self.0.insert(trip.index, trip);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trip> {
        self.0.values()
    }

    pub fn completed(&self) -> usize {
        self.iter().filter(|trip| trip.is_complete()).count()
    }

    pub fn in_progress(&self) -> usize {
        self.len() - self.completed()
    }

    /// Fold a newer fetch result into this table
    ///
    /// Entries in `newer` replace ours, except that a completed trip is
    /// never replaced by one without an end. Indices missing from `newer`
    /// are left as they are.
    pub fn merge(&mut self, newer: TripTable) {
        for (index, trip) in newer.0 {
            match self.0.entry(index) {
                btree_map::Entry::Occupied(mut existing) => {
                    if existing.get().is_complete() && !trip.is_complete() {
                        continue;
                    }
                    existing.insert(trip);
                }
                btree_map::Entry::Vacant(slot) => {
                    slot.insert(trip);
                }
            }
        }
    }
}

impl FromIterator<Trip> for TripTable {
    fn from_iter<I: IntoIterator<Item = Trip>>(iter: I) -> Self {
        TripTable(iter.into_iter().map(|trip| (trip.index, trip)).collect())
    }
}

/// Result of one trip history transfer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedTrips {
    pub trips: TripTable,
    /// Indices whose records arrived but could not be decoded
    pub undecodable: BTreeSet<u8>,
}

fn is_end_of_trips(frame: &[u8]) -> bool {
    matches!(frame, [END_OF_TRIPS])
}

/// Pair start and end records into trips
///
/// A start whose own record or matching end fails to decode produces no
/// trip; its index is reported in `undecodable` instead.
pub fn assemble_trips(
    starts: HashMap<u8, Vec<u8>>,
    mut ends: HashMap<u8, Vec<u8>>,
) -> FetchedTrips {
    let mut fetched = FetchedTrips::default();

    for (index, start) in starts {
        let end = ends.remove(&index);
        let trip = decode_trip_start(&start).and_then(|start| {
            let end = end.as_deref().map(decode_trip_end).transpose()?;
            Ok::<_, DecodeError>(Trip { index, start, end })
        });
        match trip {
            Ok(trip) => fetched.trips.insert(trip),
            Err(e) => {
                warn!("Dropping trip {}: {}", index, e);
                fetched.undecodable.insert(index);
            }
        }
    }

    for index in ends.keys() {
        debug!("Trip end {} has no matching start", index);
    }

    fetched
}

/// Consume trip records until the end-of-trips marker
///
/// Fails with `ConnectionLost` when the stream ends before the marker.
pub async fn collect_trips<S>(frames: S) -> Result<FetchedTrips, PeripheralError>
where
    S: Stream<Item = Vec<u8>>,
{
    futures_util::pin_mut!(frames);
    let mut starts = HashMap::new();
    let mut ends = HashMap::new();

    loop {
        let Some(frame) = frames.next().await else {
            return Err(PeripheralError::ConnectionLost(
                "trip stream ended before end-of-trips marker".into(),
            ));
        };
        debug!("TRIPS: {}", hex_frame(&frame));

        if is_end_of_trips(&frame) {
            break;
        }
        let (index, kind) = match frame.as_slice() {
            [index, kind, ..] => (*index, *kind),
            _ => {
                warn!("Ignoring malformed trip record {}", hex_frame(&frame));
                continue;
            }
        };
        if kind == 0 {
            starts.insert(index, frame);
        } else {
            ends.insert(index, frame);
        }
    }

    Ok(assemble_trips(starts, ends))
}

/// Run one trip history transfer against the peripheral
///
/// Subscribes to the trips characteristic, writes the history request once
/// and collects records. A link failure during the transfer yields an empty
/// result; other failures are returned. The link counts as failed as soon
/// as the peripheral leaves `Connected`, even if the subscription stays open.
pub async fn fetch_trips<P>(peripheral: &P) -> Result<FetchedTrips, PeripheralError>
where
    P: Peripheral + ?Sized,
{
    info!("About to read trips");
    let transfer = async {
        let frames = peripheral.observe(Characteristic::Trips).await?;
        info!("Writing trips fetch command");
        peripheral
            .write(Characteristic::Trips, &trip_history_request(), true)
            .await?;
        collect_trips(frames).await
    };

    let mut state = peripheral.state();
    let result = tokio::select! {
        biased;
        _ = state.wait_for(|s| *s != ConnectionState::Connected) => Err(
            PeripheralError::ConnectionLost("link went down during trip transfer".into()),
        ),
        result = transfer => result,
    };

    match result {
        Ok(fetched) => {
            info!("Finished reading trips: {} trips", fetched.trips.len());
            Ok(fetched)
        }
        Err(e) if e.is_connection_loss() => {
            debug!("Failed to read trips, probably disconnected: {}", e);
            Ok(FetchedTrips::default())
        }
        Err(e) => Err(e),
    }
}
