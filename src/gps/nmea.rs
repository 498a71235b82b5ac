//! # NMEA 0183 Receiver
//!
//! Reads sentences from a serial GPS receiver and folds them into a running
//! fix. GGA, RMC, GSA and VTG are understood from any talker (`GP`, `GN`,
//! `GL`, ...); everything else is ignored.
//!
//! Every sentence must carry a valid `*hh` checksum.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::time::{timeout_at, Instant};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, trace};

use super::GpsSource;
use crate::error::{RecorderError, Result};
use crate::telemetry::event::{FixMode, GpsFix};

/// Default receiver port on a Raspberry Pi
pub const DEFAULT_PORT: &str = "/dev/serial0";

/// Factory baud rate of most u-blox / MediaTek receivers
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// How long one sample may spend reading sentences
pub const DEFAULT_READ_BUDGET: Duration = Duration::from_millis(50);

/// Silence after which the last fix is discarded (two missed 1 Hz epochs)
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(2);

const KNOTS_TO_MPS: f64 = 0.514_444;
const KMH_TO_MPS: f64 = 1.0 / 3.6;

/// Check the `*hh` checksum and return the sentence body between `$` and `*`
///
/// # Examples
///
/// ```
/// use mission_recorder::gps::nmea::verify_checksum;
///
/// let body = verify_checksum("$GPGSA,A,3,,,,,,,,,,,,,2.0,1.0,1.7*37").unwrap();
/// assert!(body.starts_with("GPGSA"));
/// ```
pub fn verify_checksum(line: &str) -> Result<&str> {
    let line = line.trim_end();
    let rest = line
        .strip_prefix('$')
        .ok_or_else(|| RecorderError::Gps(format!("Not a sentence: {:?}", line)))?;
    let (body, checksum) = rest
        .split_once('*')
        .ok_or_else(|| RecorderError::Gps(format!("Missing checksum: {:?}", line)))?;

    let expected = u8::from_str_radix(checksum, 16)
        .map_err(|_| RecorderError::Gps(format!("Bad checksum field: {:?}", checksum)))?;
    let actual = body.bytes().fold(0u8, |acc, b| acc ^ b);

    if actual != expected {
        return Err(RecorderError::Gps(format!(
            "Checksum mismatch: expected {:02X}, got {:02X}",
            expected, actual
        )));
    }
    Ok(body)
}

/// Fix assembled from the sentences seen so far
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixState {
    latitude: Option<f64>,
    longitude: Option<f64>,
    altitude: Option<f64>,
    speed: Option<f64>,
    track: Option<f64>,
    climb: Option<f64>,
    mode: Option<FixMode>,
    satellites: u8,
    hdop: Option<f64>,
    date: Option<NaiveDate>,
    time: Option<NaiveTime>,
    /// Altitude and time of the previous GGA, for the climb rate
    last_altitude: Option<(NaiveTime, f64)>,
}

impl FixState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one raw line into the state
    ///
    /// Unknown sentence types are accepted and ignored.
    ///
    /// # Errors
    ///
    /// Returns `Gps` for a line that fails the checksum or has unparseable fields.
    pub fn apply_line(&mut self, line: &str) -> Result<()> {
        let body = verify_checksum(line)?;
        let fields: Vec<&str> = body.split(',').collect();
        let kind = fields[0];
        if kind.len() != 5 || !kind.is_ascii() {
            return Err(RecorderError::Gps(format!("Bad sentence address: {:?}", kind)));
        }

        // The first two characters are the talker
        match &kind[2..] {
            "GGA" => self.apply_gga(&fields),
            "RMC" => self.apply_rmc(&fields),
            "GSA" => self.apply_gsa(&fields),
            "VTG" => self.apply_vtg(&fields),
            other => {
                trace!("Ignoring {} sentence", other);
                Ok(())
            }
        }
    }

    /// The current fix, if the receiver has a 2D or 3D solution
    pub fn fix(&self) -> Result<GpsFix> {
        let mode = self.mode.unwrap_or(FixMode::NoFix);
        let (Some(latitude), Some(longitude)) = (self.latitude, self.longitude) else {
            return Err(RecorderError::NoFix);
        };
        if mode == FixMode::NoFix {
            return Err(RecorderError::NoFix);
        }

        let time = match (self.date, self.time) {
            (Some(date), Some(time)) => Some(Utc.from_utc_datetime(&date.and_time(time))),
            _ => None,
        };

        Ok(GpsFix {
            latitude,
            longitude,
            altitude: if mode == FixMode::Fix3d { self.altitude } else { None },
            speed: self.speed,
            track: self.track,
            climb: if mode == FixMode::Fix3d { self.climb } else { None },
            mode,
            satellites: self.satellites,
            time,
            error: self.hdop,
        })
    }

    // $--GGA,hhmmss.ss,llll.ll,a,yyyyy.yy,a,q,nn,h.h,a.a,M,...
    fn apply_gga(&mut self, f: &[&str]) -> Result<()> {
        let time = parse_time(field(f, 1))?;
        let quality = parse_opt::<u8>(field(f, 6))?.unwrap_or(0);

        if quality == 0 {
            self.mode = Some(FixMode::NoFix);
            return Ok(());
        }

        self.time = time.or(self.time);
        self.latitude = parse_coordinate(field(f, 2), field(f, 3))?;
        self.longitude = parse_coordinate(field(f, 4), field(f, 5))?;
        self.satellites = parse_opt::<u8>(field(f, 7))?.unwrap_or(0);
        self.hdop = parse_opt(field(f, 8))?;

        let altitude = parse_opt::<f64>(field(f, 9))?;
        if let (Some(now), Some(alt)) = (time, altitude) {
            if let Some((then, previous)) = self.last_altitude {
                let dt = (now - then).num_milliseconds() as f64 / 1000.0;
                if dt > 0.0 {
                    self.climb = Some((alt - previous) / dt);
                }
            }
            self.last_altitude = Some((now, alt));
        }
        self.altitude = altitude;

        // GSA is authoritative for the mode; without one, GGA implies it
        if self.mode.is_none() || self.mode == Some(FixMode::NoFix) {
            self.mode = Some(if altitude.is_some() { FixMode::Fix3d } else { FixMode::Fix2d });
        }
        Ok(())
    }

    // $--RMC,hhmmss.ss,A,llll.ll,a,yyyyy.yy,a,x.x,x.x,ddmmyy,...
    fn apply_rmc(&mut self, f: &[&str]) -> Result<()> {
        if field(f, 2) != "A" {
            self.mode = Some(FixMode::NoFix);
            return Ok(());
        }

        self.time = parse_time(field(f, 1))?.or(self.time);
        self.date = parse_date(field(f, 9))?.or(self.date);
        self.latitude = parse_coordinate(field(f, 3), field(f, 4))?;
        self.longitude = parse_coordinate(field(f, 5), field(f, 6))?;
        self.speed = parse_opt::<f64>(field(f, 7))?.map(|knots| knots * KNOTS_TO_MPS);
        self.track = parse_opt(field(f, 8))?;

        if self.mode.is_none() || self.mode == Some(FixMode::NoFix) {
            self.mode = Some(FixMode::Fix2d);
        }
        Ok(())
    }

    // $--GSA,a,x,xx,xx,xx,xx,xx,xx,xx,xx,xx,xx,xx,xx,p.p,h.h,v.v
    fn apply_gsa(&mut self, f: &[&str]) -> Result<()> {
        self.mode = Some(match parse_opt::<u8>(field(f, 2))? {
            Some(2) => FixMode::Fix2d,
            Some(3) => FixMode::Fix3d,
            _ => FixMode::NoFix,
        });
        if let Some(hdop) = parse_opt(field(f, 16))? {
            self.hdop = Some(hdop);
        }
        Ok(())
    }

    // $--VTG,x.x,T,x.x,M,x.x,N,x.x,K
    fn apply_vtg(&mut self, f: &[&str]) -> Result<()> {
        if let Some(track) = parse_opt(field(f, 1))? {
            self.track = Some(track);
        }
        let speed = match parse_opt::<f64>(field(f, 5))? {
            Some(knots) => Some(knots * KNOTS_TO_MPS),
            None => parse_opt::<f64>(field(f, 7))?.map(|kmh| kmh * KMH_TO_MPS),
        };
        if speed.is_some() {
            self.speed = speed;
        }
        Ok(())
    }
}

fn field<'a>(fields: &[&'a str], index: usize) -> &'a str {
    fields.get(index).copied().unwrap_or("")
}

fn parse_opt<T: std::str::FromStr>(value: &str) -> Result<Option<T>> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| RecorderError::Gps(format!("Bad field: {:?}", value)))
}

/// `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere to signed decimal degrees
fn parse_coordinate(value: &str, hemisphere: &str) -> Result<Option<f64>> {
    let Some(raw) = parse_opt::<f64>(value)? else {
        return Ok(None);
    };
    let degrees = (raw / 100.0).trunc();
    let decimal = degrees + (raw - degrees * 100.0) / 60.0;

    match hemisphere {
        "N" | "E" => Ok(Some(decimal)),
        "S" | "W" => Ok(Some(-decimal)),
        other => Err(RecorderError::Gps(format!("Bad hemisphere: {:?}", other))),
    }
}

/// `hhmmss` with optional fractional seconds
fn parse_time(value: &str) -> Result<Option<NaiveTime>> {
    if value.is_empty() {
        return Ok(None);
    }
    NaiveTime::parse_from_str(value, "%H%M%S%.f")
        .map(Some)
        .map_err(|_| RecorderError::Gps(format!("Bad time: {:?}", value)))
}

/// `ddmmyy`
fn parse_date(value: &str) -> Result<Option<NaiveDate>> {
    if value.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(value, "%d%m%y")
        .map(Some)
        .map_err(|_| RecorderError::Gps(format!("Bad date: {:?}", value)))
}

/// Sentence reader over any byte stream
pub struct NmeaReader<R> {
    lines: Lines<BufReader<R>>,
    state: FixState,
    read_budget: Duration,
    stale_after: Duration,
    /// When the last valid sentence was applied
    last_sentence: Option<Instant>,
}

impl<R: AsyncRead + Unpin + Send> NmeaReader<R> {
    /// Wrap a byte stream carrying NMEA sentences
    ///
    /// # Arguments
    ///
    /// * `reader` - Serial port or any other sentence stream
    /// * `read_budget` - How long one `current_fix` call may spend reading
    pub fn new(reader: R, read_budget: Duration) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            state: FixState::new(),
            read_budget,
            stale_after: DEFAULT_STALE_AFTER,
            last_sentence: None,
        }
    }

    /// Replace the silence limit after which the fix is dropped
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Read for up to the read budget, then report the fix
    ///
    /// A bad sentence is logged and skipped; the rest of the stream is still used.
    /// Once no valid sentence has arrived for the silence limit, the
    /// accumulated fix is discarded, so a receiver that hangs with the port
    /// still open never repeats its last position.
    ///
    /// # Errors
    ///
    /// `Gps` if the stream ended, failed or went silent, `NoFix` if there is no
    /// 2D/3D solution.
    pub async fn current_fix(&mut self) -> Result<GpsFix> {
        let deadline = Instant::now() + self.read_budget;

        loop {
            // next_line is cancel-safe; a partial line survives the timeout
            match timeout_at(deadline, self.lines.next_line()).await {
                Err(_) => break,
                Ok(Ok(Some(line))) => {
                    if line.is_empty() {
                        continue;
                    }
                    match self.state.apply_line(&line) {
                        Ok(()) => self.last_sentence = Some(Instant::now()),
                        Err(e) => debug!("Skipping sentence: {}", e),
                    }
                }
                Ok(Ok(None)) => return Err(RecorderError::Gps("stream closed".to_string())),
                Ok(Err(e)) => return Err(RecorderError::Gps(e.to_string())),
            }
        }

        if let Some(last) = self.last_sentence {
            let silent = last.elapsed();
            if silent > self.stale_after {
                // Climb and altitude history go too
                self.state = FixState::new();
                return Err(RecorderError::Gps(format!("Receiver silent for {:?}", silent)));
            }
        }

        self.state.fix()
    }
}

/// NMEA receiver on a serial port
pub struct SerialGps {
    port: String,
    baud_rate: u32,
    read_budget: Duration,
    stale_after: Duration,
    reader: Option<NmeaReader<SerialStream>>,
}

impl std::fmt::Debug for SerialGps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialGps")
            .field("port", &self.port)
            .field("baud_rate", &self.baud_rate)
            .field("connected", &self.reader.is_some())
            .finish_non_exhaustive()
    }
}

impl SerialGps {
    /// Describe the receiver; nothing is opened until `connect`
    ///
    /// # Arguments
    ///
    /// * `port` - Serial device path (e.g., "/dev/serial0")
    /// * `baud_rate` - Receiver baud rate
    /// * `read_budget` - Reading time per sample
    pub fn new(port: impl Into<String>, baud_rate: u32, read_budget: Duration) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            read_budget,
            stale_after: DEFAULT_STALE_AFTER,
            reader: None,
        }
    }

    /// Replace the silence limit after which the fix is dropped
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// 8N1, no flow control
    fn open_port(&self) -> Result<SerialStream> {
        tokio_serial::new(&self.port, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| RecorderError::Serial(format!("Failed to open {}: {}", self.port, e)))
    }
}

#[async_trait]
impl GpsSource for SerialGps {
    async fn connect(&mut self) -> Result<()> {
        let port = self.open_port()?;
        info!("Opened GPS receiver at {} ({} baud)", self.port, self.baud_rate);
        self.reader = Some(NmeaReader::new(port, self.read_budget).with_stale_after(self.stale_after));
        Ok(())
    }

    async fn current_fix(&mut self) -> Result<GpsFix> {
        match self.reader.as_mut() {
            Some(reader) => reader.current_fix().await,
            None => Err(RecorderError::Gps(format!("{} is not connected", self.port))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";

    /// Append a valid checksum to a sentence body
    fn sentence(body: &str) -> String {
        let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
        format!("${}*{:02X}", body, checksum)
    }

    #[test]
    fn test_checksum_accepts_reference_sentences() {
        assert!(verify_checksum(GGA).is_ok());
        assert!(verify_checksum(RMC).is_ok());
        assert!(verify_checksum(&format!("{}\r\n", GGA)).is_ok());
    }

    #[test]
    fn test_checksum_rejects_corruption() {
        let corrupted = GGA.replace("545.4", "545.5");
        assert!(matches!(verify_checksum(&corrupted), Err(RecorderError::Gps(_))));
        assert!(verify_checksum("$GPGGA,123519").is_err(), "Missing checksum");
        assert!(verify_checksum("GPGGA,123519*00").is_err(), "Missing $");
    }

    #[test]
    fn test_gga_position_and_altitude() {
        let mut state = FixState::new();
        state.apply_line(GGA).unwrap();
        let fix = state.fix().unwrap();

        assert!((fix.latitude - 48.1173).abs() < 1e-6);
        assert!((fix.longitude - 11.516_666).abs() < 1e-5);
        assert_eq!(fix.altitude, Some(545.4));
        assert_eq!(fix.satellites, 8);
        assert_eq!(fix.error, Some(0.9));
        assert_eq!(fix.mode, FixMode::Fix3d);
        // No date seen yet
        assert_eq!(fix.time, None);
    }

    #[test]
    fn test_rmc_speed_in_metres_per_second_and_date() {
        let mut state = FixState::new();
        state.apply_line(GGA).unwrap();
        state.apply_line(RMC).unwrap();
        let fix = state.fix().unwrap();

        let speed = fix.speed.unwrap();
        assert!((speed - 22.4 * 0.514_444).abs() < 1e-6);
        assert_eq!(fix.track, Some(84.4));
        assert_eq!(fix.time.unwrap().to_rfc3339(), "1994-03-23T12:35:19+00:00");
    }

    #[test]
    fn test_southern_and_western_hemispheres_are_negative() {
        let mut state = FixState::new();
        state
            .apply_line(&sentence("GNGGA,000000,3352.000,S,15112.000,W,1,05,1.2,10.0,M,,M,,"))
            .unwrap();
        let fix = state.fix().unwrap();
        assert!((fix.latitude + 33.866_666).abs() < 1e-5);
        assert!((fix.longitude + 151.2).abs() < 1e-6);
    }

    #[test]
    fn test_no_fix_until_solution() {
        let mut state = FixState::new();
        assert!(matches!(state.fix(), Err(RecorderError::NoFix)));

        state.apply_line(&sentence("GPGGA,123519,,,,,0,00,,,M,,M,,")).unwrap();
        assert!(matches!(state.fix(), Err(RecorderError::NoFix)));

        state.apply_line(&sentence("GPRMC,123519,V,,,,,,,230394,,")).unwrap();
        assert!(matches!(state.fix(), Err(RecorderError::NoFix)));
    }

    #[test]
    fn test_gsa_mode_overrides_gga() {
        let mut state = FixState::new();
        state.apply_line(GGA).unwrap();
        state.apply_line(&sentence("GPGSA,A,2,04,05,,,,,,,,,,,2.5,1.3,2.1")).unwrap();

        let fix = state.fix().unwrap();
        assert_eq!(fix.mode, FixMode::Fix2d);
        assert_eq!(fix.altitude, None, "2D fix has no altitude");
        assert_eq!(fix.error, Some(1.3));

        state.apply_line(&sentence("GPGSA,A,1,,,,,,,,,,,,,,,")).unwrap();
        assert!(matches!(state.fix(), Err(RecorderError::NoFix)));
    }

    #[test]
    fn test_vtg_kmh_fallback() {
        let mut state = FixState::new();
        state.apply_line(GGA).unwrap();
        state.apply_line(&sentence("GPVTG,054.7,T,034.4,M,,N,036.0,K")).unwrap();
        let fix = state.fix().unwrap();
        assert_eq!(fix.track, Some(54.7));
        assert!((fix.speed.unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_climb_from_consecutive_gga() {
        let mut state = FixState::new();
        state.apply_line(&sentence("GPGGA,120000,4807.038,N,01131.000,E,1,08,0.9,100.0,M,,M,,")).unwrap();
        state.apply_line(&sentence("GPGGA,120002,4807.038,N,01131.000,E,1,08,0.9,104.0,M,,M,,")).unwrap();
        assert_eq!(state.fix().unwrap().climb, Some(2.0));
    }

    #[test]
    fn test_unknown_sentences_are_ignored() {
        let mut state = FixState::new();
        state.apply_line(&sentence("GPGSV,3,1,11,03,03,111,00")).unwrap();
        assert_eq!(state, FixState::new());
    }

    #[tokio::test]
    async fn test_reader_skips_bad_sentences() {
        let input = format!("garbage\r\n{}\r\n$GPGGA,1*00\r\n", GGA);
        let stream = tokio_test::io::Builder::new()
            .read(input.as_bytes())
            .wait(Duration::from_millis(200))
            .build();

        let mut reader = NmeaReader::new(stream, Duration::from_millis(20));
        let fix = reader.current_fix().await.unwrap();
        assert_eq!(fix.satellites, 8);
    }

    #[tokio::test]
    async fn test_reader_keeps_partial_line_across_budget() {
        let (head, tail) = GGA.split_at(30);
        let stream = tokio_test::io::Builder::new()
            .read(head.as_bytes())
            .wait(Duration::from_millis(50))
            .read(format!("{}\r\n", tail).as_bytes())
            .wait(Duration::from_millis(200))
            .build();

        let mut reader = NmeaReader::new(stream, Duration::from_millis(20));
        assert!(matches!(reader.current_fix().await, Err(RecorderError::NoFix)));

        // Second sample: the rest of the line arrives and completes the sentence
        tokio::time::sleep(Duration::from_millis(60)).await;
        let fix = reader.current_fix().await.unwrap();
        assert_eq!(fix.altitude, Some(545.4));
    }

    #[tokio::test]
    async fn test_silent_receiver_drops_last_fix() {
        let second = sentence("GPGGA,123525,4807.038,N,01131.000,E,1,08,0.9,560.0,M,46.9,M,,");
        let stream = tokio_test::io::Builder::new()
            .read(format!("{}\r\n", GGA).as_bytes())
            .wait(Duration::from_millis(250))
            .read(format!("{}\r\n", second).as_bytes())
            .wait(Duration::from_millis(500))
            .build();

        let mut reader =
            NmeaReader::new(stream, Duration::from_millis(20)).with_stale_after(Duration::from_millis(100));
        assert!(reader.current_fix().await.is_ok());

        // Port open, nothing arriving
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(matches!(reader.current_fix().await, Err(RecorderError::Gps(_))));
        assert!(matches!(reader.current_fix().await, Err(RecorderError::Gps(_))));

        // The receiver comes back; no climb against the pre-silence altitude
        tokio::time::sleep(Duration::from_millis(150)).await;
        let fix = reader.current_fix().await.unwrap();
        assert_eq!(fix.altitude, Some(560.0));
        assert_eq!(fix.climb, None);
    }

    #[tokio::test]
    async fn test_reader_reports_closed_stream() {
        let mut reader = NmeaReader::new(&b""[..], DEFAULT_READ_BUDGET);
        match reader.current_fix().await {
            Err(RecorderError::Gps(message)) => assert_eq!(message, "stream closed"),
            other => panic!("Expected closed stream, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unconnected_serial_gps_fails_sample() {
        let mut gps = SerialGps::new(DEFAULT_PORT, DEFAULT_BAUD_RATE, DEFAULT_READ_BUDGET);
        assert!(matches!(gps.current_fix().await, Err(RecorderError::Gps(_))));
    }
}
