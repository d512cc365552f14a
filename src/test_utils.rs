use crate::mac_address::MacAddress;
use crate::measurement::{
    Activity, BodyComposition, Gender, Measurement, MeasurementKind, PersonId, PersonInfo,
    WeightReading,
};
use crate::protocol::{
    COMMAND_CHARACTERISTIC, MEASUREMENT_SERVICE, OPCODE_BODY, OPCODE_PERSON, OPCODE_WEIGHT,
    device_timestamp,
};
use crate::scanner::{DiscoveredDevice, Discovery, ScanError};
use crate::session::{
    Connector, GattCharacteristic, GattLink, GattService, LinkError, Notification,
};
use crate::sink::{Delivery, Sink, SinkError};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{Instant, sleep, sleep_until};
use uuid::Uuid;

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
pub const OTHER_MAC: MacAddress = MacAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

/// Value handle of the scripted indication characteristic.
pub const INDICATION_HANDLE: u16 = 0x0025;
/// Value handle of the command characteristic in [`scale_services`].
pub const COMMAND_HANDLE: u16 = 0x0023;

// --- frames -----------------------------------------------------------------

pub fn person_frame(person: u8, gender: u8, age: u8, height: u8, activity: u8) -> Vec<u8> {
    vec![OPCODE_PERSON, 0x00, person, 0x00, gender, age, height, 0x00, activity]
}

pub fn weight_frame(weight_raw: u16, status: u8, ts_raw: u32, person: u8) -> Vec<u8> {
    let mut frame = vec![OPCODE_WEIGHT];
    frame.extend_from_slice(&weight_raw.to_le_bytes());
    frame.push(status);
    frame.push(0x00);
    frame.extend_from_slice(&ts_raw.to_le_bytes());
    frame.extend_from_slice(&[0x00; 4]);
    frame.push(person);
    frame
}

pub fn body_frame(
    ts_raw: u32,
    person: u8,
    kcal: u16,
    [fat, water, muscle, bone]: [u16; 4],
) -> Vec<u8> {
    let mut frame = vec![OPCODE_BODY];
    frame.extend_from_slice(&ts_raw.to_le_bytes());
    frame.push(person);
    for value in [kcal, fat, water, muscle, bone] {
        frame.extend_from_slice(&value.to_le_bytes());
    }
    frame
}

// --- measurements -------------------------------------------------------------

pub fn person(id: PersonId) -> Measurement {
    Measurement::Person(PersonInfo {
        person: id,
        gender: Gender::Male,
        age: 30,
        height_cm: 180,
        activity: Activity::Normal,
    })
}

pub fn weight(person: PersonId, raw: u16, ts_raw: u32) -> Measurement {
    Measurement::Weight(WeightReading {
        person,
        weight_kg: f64::from(raw) / 100.0,
        stabilized: true,
        impedance_measured: true,
        timestamp: device_timestamp(ts_raw),
    })
}

pub fn body(person: PersonId, ts_raw: u32) -> Measurement {
    Measurement::Body(BodyComposition {
        person,
        timestamp: device_timestamp(ts_raw),
        kcal: 2100,
        fat_pct: 10.0,
        water_pct: 50.0,
        muscle_pct: 40.0,
        bone_pct: 3.0,
    })
}

// --- sinks --------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDelivery {
    pub sink: String,
    pub person: PersonId,
    pub batch_len: usize,
    pub kinds: Vec<MeasurementKind>,
    pub readings: Vec<Measurement>,
}

pub type DeliveryLog = Arc<Mutex<Vec<RecordedDelivery>>>;

/// Sink recording every delivery into a shared log.
pub struct RecordingSink {
    name: String,
    log: DeliveryLog,
    fail: bool,
}

impl RecordingSink {
    pub fn shared_log() -> DeliveryLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub fn new(name: &str, log: DeliveryLog) -> Self {
        Self {
            name: name.to_string(),
            log,
            fail: false,
        }
    }

    /// Rejects every delivery without recording it.
    pub fn failing(name: &str, log: DeliveryLog) -> Self {
        Self {
            fail: true,
            ..Self::new(name, log)
        }
    }
}

impl Sink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&mut self, delivery: &Delivery<'_>) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError::Io(io::Error::other("sink is broken")));
        }
        self.log.lock().unwrap().push(RecordedDelivery {
            sink: self.name.clone(),
            person: delivery.aggregate.person(),
            batch_len: delivery.batch.len(),
            kinds: delivery.aggregate.readings().map(|(key, _)| key.kind).collect(),
            readings: delivery.aggregate.readings().map(|(_, m)| m.clone()).collect(),
        });
        Ok(())
    }
}

// --- GATT ---------------------------------------------------------------------

fn short_uuid(short: u16) -> Uuid {
    Uuid::from_u128(0x0000_0000_0000_1000_8000_00805f9b34fb | (u128::from(short) << 96))
}

/// The vendor service as the scale presents it: three indicating
/// measurement characteristics plus the command characteristic.
pub fn scale_services() -> Vec<GattService> {
    vec![
        GattService {
            uuid: short_uuid(0x1800),
            characteristics: vec![GattCharacteristic {
                uuid: short_uuid(0x2a00),
                handle: 0x0003,
                indicate: false,
            }],
        },
        GattService {
            uuid: MEASUREMENT_SERVICE,
            characteristics: vec![
                GattCharacteristic {
                    uuid: short_uuid(0x8a21),
                    handle: 0x001e,
                    indicate: true,
                },
                GattCharacteristic {
                    uuid: COMMAND_CHARACTERISTIC,
                    handle: COMMAND_HANDLE,
                    indicate: false,
                },
                GattCharacteristic {
                    uuid: short_uuid(0x8a22),
                    handle: INDICATION_HANDLE,
                    indicate: true,
                },
                GattCharacteristic {
                    uuid: short_uuid(0x8a82),
                    handle: 0x0028,
                    indicate: true,
                },
            ],
        },
    ]
}

/// Everything a [`FakeLink`] was asked to do.
#[derive(Debug, Default)]
pub struct LinkLog {
    pub descriptor_writes: Vec<(u16, Vec<u8>)>,
    pub characteristic_writes: Vec<(u16, Vec<u8>)>,
    pub disconnects: usize,
}

pub type SharedLinkLog = Arc<Mutex<LinkLog>>;

/// Scripted link. Each scripted event fires `delay` after the previous one
/// (the first one after collection starts polling).
pub struct FakeLink {
    services: Vec<GattService>,
    script: VecDeque<(Duration, Result<Vec<u8>, LinkError>)>,
    next_due: Option<Instant>,
    failing_writes: Vec<(u8, LinkError)>,
    stalled_writes: Vec<u8>,
    log: SharedLinkLog,
}

impl FakeLink {
    pub fn new(log: SharedLinkLog) -> Self {
        Self {
            services: scale_services(),
            script: VecDeque::new(),
            next_due: None,
            failing_writes: Vec::new(),
            stalled_writes: Vec::new(),
            log,
        }
    }

    pub fn with_services(mut self, services: Vec<GattService>) -> Self {
        self.services = services;
        self
    }

    pub fn notify_after(mut self, delay: Duration, frame: Vec<u8>) -> Self {
        self.script.push_back((delay, Ok(frame)));
        self
    }

    pub fn fail_after(mut self, delay: Duration, err: LinkError) -> Self {
        self.script.push_back((delay, Err(err)));
        self
    }

    /// Characteristic writes whose first byte is `opcode` fail with `err`.
    pub fn failing_write(mut self, opcode: u8, err: LinkError) -> Self {
        self.failing_writes.push((opcode, err));
        self
    }

    /// Characteristic writes whose first byte is `opcode` never complete.
    pub fn stalled_write(mut self, opcode: u8) -> Self {
        self.stalled_writes.push(opcode);
        self
    }
}

impl GattLink for FakeLink {
    fn services(&mut self) -> BoxFuture<'_, Result<Vec<GattService>, LinkError>> {
        futures::future::ready(Ok(self.services.clone())).boxed()
    }

    fn write_descriptor<'a>(
        &'a mut self,
        handle: u16,
        value: &'a [u8],
    ) -> BoxFuture<'a, Result<(), LinkError>> {
        self.log
            .lock()
            .unwrap()
            .descriptor_writes
            .push((handle, value.to_vec()));
        futures::future::ready(Ok(())).boxed()
    }

    fn write_characteristic<'a>(
        &'a mut self,
        handle: u16,
        value: &'a [u8],
    ) -> BoxFuture<'a, Result<(), LinkError>> {
        self.log
            .lock()
            .unwrap()
            .characteristic_writes
            .push((handle, value.to_vec()));
        if value.first().is_some_and(|opcode| self.stalled_writes.contains(opcode)) {
            return futures::future::pending().boxed();
        }
        let failure = self
            .failing_writes
            .iter()
            .find(|(opcode, _)| value.first() == Some(opcode))
            .map(|(_, err)| err.clone());
        futures::future::ready(failure.map_or(Ok(()), Err)).boxed()
    }

    fn next_notification(
        &mut self,
        wait: Duration,
    ) -> BoxFuture<'_, Result<Option<Notification>, LinkError>> {
        Box::pin(async move {
            let Some((delay, _)) = self.script.front() else {
                sleep(wait).await;
                return Ok(None);
            };
            let delay = *delay;
            let due = *self.next_due.get_or_insert_with(|| Instant::now() + delay);
            if due > Instant::now() + wait {
                sleep(wait).await;
                return Ok(None);
            }
            sleep_until(due).await;
            self.next_due = None;
            let (_, event) = self.script.pop_front().unwrap();
            event.map(|value| {
                Some(Notification {
                    handle: INDICATION_HANDLE,
                    value,
                })
            })
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), LinkError>> {
        self.log.lock().unwrap().disconnects += 1;
        futures::future::ready(Ok(())).boxed()
    }
}

/// Hands out scripted connection outcomes in order; once exhausted every
/// connect fails.
#[derive(Clone, Default)]
pub struct FakeConnector {
    outcomes: Arc<Mutex<VecDeque<Result<FakeLink, LinkError>>>>,
    connects: Arc<Mutex<Vec<MacAddress>>>,
    hang: bool,
}

impl FakeConnector {
    pub fn new(outcomes: Vec<Result<FakeLink, LinkError>>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(outcomes.into())),
            ..Self::default()
        }
    }

    /// Every connect stays pending forever.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn connects(&self) -> Vec<MacAddress> {
        self.connects.lock().unwrap().clone()
    }
}

impl Connector for FakeConnector {
    fn connect(&self, address: MacAddress) -> BoxFuture<'_, Result<Box<dyn GattLink>, LinkError>> {
        self.connects.lock().unwrap().push(address);
        if self.hang {
            return futures::future::pending().boxed();
        }
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LinkError::Connect("device not reachable".into())));
        futures::future::ready(outcome.map(|link| Box::new(link) as Box<dyn GattLink>)).boxed()
    }
}

/// Returns one scripted advertisement list per scan cycle; afterwards
/// every cycle sees nothing.
#[derive(Clone, Default)]
pub struct FakeDiscovery {
    cycles: Arc<Mutex<VecDeque<Result<Vec<DiscoveredDevice>, ScanError>>>>,
    scans: Arc<Mutex<usize>>,
}

impl FakeDiscovery {
    pub fn new(cycles: Vec<Vec<DiscoveredDevice>>) -> Self {
        Self {
            cycles: Arc::new(Mutex::new(cycles.into_iter().map(Ok).collect())),
            scans: Arc::default(),
        }
    }

    pub fn push_error(&self, err: ScanError) {
        self.cycles.lock().unwrap().push_back(Err(err));
    }

    pub fn scans(&self) -> usize {
        *self.scans.lock().unwrap()
    }
}

pub fn seen(address: MacAddress) -> DiscoveredDevice {
    DiscoveredDevice {
        address,
        rssi: Some(-60),
    }
}

/// A device the backend remembers from an earlier scan but that has not
/// advertised in this one.
pub fn cached(address: MacAddress) -> DiscoveredDevice {
    DiscoveredDevice {
        address,
        rssi: None,
    }
}

impl Discovery for FakeDiscovery {
    fn discover(&self) -> BoxFuture<'_, Result<BoxStream<'static, DiscoveredDevice>, ScanError>> {
        *self.scans.lock().unwrap() += 1;
        let cycle = self.cycles.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()));
        futures::future::ready(cycle.map(|devices| stream::iter(devices).boxed())).boxed()
    }
}
