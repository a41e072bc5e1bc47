//! IMU session - high-level orchestration over one serial port.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::command::CommandClient;
use crate::events::{ImuEvent, ImuObserver, TracingObserver};
use crate::packet::{LogReplay, PacketFormat, PacketKind};
use crate::protocol::{BAUD_DEFAULT, RESPONSE_TIMEOUT};
use crate::stream::{
    CancelToken, FrameLogger, FrameSynchronizer, LogSummary, SampleStream, StreamQueue,
    detect_format, negotiate_format,
};
use crate::transport::{ObservableTransport, SerialPortTransport, SerialTransport, TransportError};
use crate::upgrade::{FirmwareImage, UpgradeRun, Upgrader};

/// Plot window settings consumed by visual front ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    /// Seconds of history shown.
    pub max_time_secs: f64,
    /// Redraw interval in seconds.
    pub refresh_secs: f64,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            max_time_secs: 10.0,
            refresh_secs: 0.02,
        }
    }
}

/// Configuration for an IMU session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial port name (`/dev/ttyUSB0`, `COM3`).
    pub port: String,
    pub baud_rate: u32,
    /// Device output data rate in Hz.
    pub output_rate: u32,
    pub packet_type: PacketKind,
    pub device_type: String,
    /// Directory receiving binary logs.
    pub log_dir: PathBuf,
    /// Packet-rate code reported for field 0x0001 by `fields get`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_setting: Option<u8>,
    pub visual: VisualConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: BAUD_DEFAULT,
            output_rate: 100,
            packet_type: PacketKind::S1,
            device_type: "IMU330BA".to_string(),
            log_dir: PathBuf::from("data"),
            rate_setting: None,
            visual: VisualConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Orchestrates logging, visualization feeds, commands and upgrades for
/// one configured device.
pub struct ImuSession<O: ImuObserver> {
    config: SessionConfig,
    observer: Arc<O>,
}

impl ImuSession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: ImuObserver + 'static> ImuSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: SessionConfig, observer: Arc<O>) -> Self {
        Self { config, observer }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open the configured port with both buffers flushed.
    #[instrument(skip(self), fields(port = %self.config.port))]
    pub fn open_transport(&self) -> Result<SerialPortTransport> {
        let transport = open_port(&self.config.port, self.config.baud_rate)?;
        self.observer.on_event(&ImuEvent::Connected {
            port: self.config.port.clone(),
            baud: self.config.baud_rate,
        });
        Ok(transport)
    }

    /// Command client on a fresh connection, with TX/RX reported to the observer.
    pub fn command_client(
        &self,
    ) -> Result<CommandClient<ObservableTransport<SerialPortTransport, O>>> {
        let transport = ObservableTransport::new(self.open_transport()?, self.observer.clone());
        let client = CommandClient::new(transport);
        Ok(match self.config.rate_setting {
            Some(code) => client.with_rate_setting(code),
            None => client,
        })
    }

    fn negotiate(&self, transport: &mut SerialPortTransport) -> Result<PacketFormat> {
        let format = negotiate_format(transport, self.config.packet_type, RESPONSE_TIMEOUT)
            .context("Failed to read device stream")?;
        Ok(format)
    }

    /// Record validated frames to `<log_dir>/<device>_<tag>_<timestamp>.bin`
    /// until `cancel` fires.
    #[instrument(skip(self, cancel))]
    pub fn log_to_file(&self, cancel: CancelToken) -> Result<(PathBuf, LogSummary)> {
        let mut transport = self.open_transport()?;
        let format = self.negotiate(&mut transport)?;
        transport.clear_input()?;

        std::fs::create_dir_all(&self.config.log_dir).with_context(|| {
            format!("Failed to create log directory {}", self.config.log_dir.display())
        })?;
        let path = self.config.log_dir.join(log_file_name(
            &self.config.device_type,
            format.kind(),
            SystemTime::now(),
        ));
        let file = File::create(&path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        info!(path = %path.display(), kind = %format.kind(), "Logging started");

        let (summary, _) = record(transport, format, BufWriter::new(file), self.config.output_rate, cancel)
            .inspect_err(|e| {
                self.observer.on_event(&ImuEvent::Error {
                    stage: "log".to_string(),
                    message: format!("{e:#}"),
                })
            })?;
        self.observer.on_event(&ImuEvent::Complete);
        Ok((path, summary))
    }

    /// Decimated, decoded samples for live display.
    ///
    /// The port is reopened by the stream's watchdog whenever it goes quiet.
    pub fn samples(
        &self,
        cancel: CancelToken,
    ) -> Result<
        SampleStream<SerialPortTransport, impl FnMut() -> Result<SerialPortTransport, TransportError>>,
    > {
        let format = {
            let mut transport = self.open_transport()?;
            self.negotiate(&mut transport)?
        };
        let port = self.config.port.clone();
        let baud = self.config.baud_rate;
        let opener = move || open_port(&port, baud);
        let observer: Arc<dyn ImuObserver> = self.observer.clone();
        Ok(SampleStream::new(opener, format, self.config.output_rate, cancel).with_observer(observer))
    }

    /// Start upgrading the device with the image at `image_path`.
    ///
    /// Returns the lazy progress sequence; nothing is sent until it is polled.
    pub fn upgrade<P: AsRef<Path>>(
        &self,
        image_path: P,
    ) -> Result<UpgradeRun<ObservableTransport<SerialPortTransport, O>>> {
        let image = FirmwareImage::load(image_path.as_ref()).with_context(|| {
            format!("Failed to load firmware image {}", image_path.as_ref().display())
        })?;
        let observer: Arc<dyn ImuObserver> = self.observer.clone();
        Ok(Upgrader::new(self.command_client()?)
            .with_observer(observer)
            .run(image))
    }
}

/// Open a recorded log. For negotiated formats the frame length is taken
/// from the first frame header in the file.
pub fn open_log<P: AsRef<Path>>(path: P, kind: PacketKind) -> Result<LogReplay> {
    let data = std::fs::read(path.as_ref())
        .with_context(|| format!("Failed to read log {}", path.as_ref().display()))?;
    let format = detect_format(kind, &data).unwrap_or_else(|| PacketFormat::new(kind));
    Ok(LogReplay::new(format, data))
}

fn open_port(port: &str, baud: u32) -> Result<SerialPortTransport, TransportError> {
    let mut transport = SerialPortTransport::open(port, baud)?;
    transport.clear_input()?;
    transport.clear_output()?;
    Ok(transport)
}

/// Stream frames from `transport` into `sink` until `cancel` fires or the
/// link fails. A link failure is reported ahead of any sink error.
fn record<T, W>(
    transport: T,
    format: PacketFormat,
    sink: W,
    output_rate: u32,
    cancel: CancelToken,
) -> Result<(LogSummary, W)>
where
    T: SerialTransport + 'static,
    W: Write,
{
    let queue = Arc::new(StreamQueue::for_output_rate(output_rate));
    let producer = FrameSynchronizer::new(transport, format, queue.clone(), cancel.clone()).spawn();
    let logged = FrameLogger::new(sink, queue, cancel.clone(), output_rate).run();

    // Stops the producer when the sink failed first.
    cancel.cancel();
    producer
        .join()
        .map_err(|_| anyhow!("Synchronizer thread panicked"))?
        .context("Stream failed")?;
    logged.context("Log write failed")
}

/// Packet kind encoded in a log file name produced by [`ImuSession::log_to_file`].
pub fn kind_from_log_name<P: AsRef<Path>>(path: P) -> Option<PacketKind> {
    let stem = path.as_ref().file_stem()?.to_str()?;
    stem.split('_').nth(1)?.parse().ok()
}

fn log_file_name(device: &str, kind: PacketKind, at: SystemTime) -> String {
    let secs = at
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    format!("{device}_{kind}_{secs}.bin")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use tempfile::tempdir;

    #[test]
    fn test_config_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("imu.toml");
        let config = SessionConfig {
            port: "/dev/ttyUSB1".to_string(),
            output_rate: 200,
            packet_type: PacketKind::Fm,
            rate_setting: Some(1),
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("packet_type = \"FM\""));
        assert_eq!(SessionConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("imu.toml");
        std::fs::write(&path, "port = \"COM3\"\n[visual]\nmax_time_secs = 30.0\n").unwrap();

        let config = SessionConfig::load_from_file(&path).unwrap();
        assert_eq!(config.port, "COM3");
        assert_eq!(config.baud_rate, 230_400);
        assert_eq!(config.packet_type, PacketKind::S1);
        assert_eq!(config.visual.max_time_secs, 30.0);
        assert_eq!(config.visual.refresh_secs, 0.02);
        assert_eq!(config.log_dir, PathBuf::from("data"));
        assert_eq!(config.rate_setting, None);
    }

    #[test]
    fn test_log_file_name() {
        let at = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(
            log_file_name("IMU330BA", PacketKind::S1, at),
            "IMU330BA_S1_1700000000.bin"
        );
    }

    #[test]
    fn test_kind_from_log_name() {
        assert_eq!(kind_from_log_name("data/IMU330BA_FM_1700000000.bin"), Some(PacketKind::Fm));
        assert_eq!(kind_from_log_name("IMU330BA_s3_1.bin"), Some(PacketKind::S3));
        assert_eq!(kind_from_log_name("capture.bin"), None);
        assert_eq!(kind_from_log_name("IMU_XX_1.bin"), None);
    }

    fn s1_frame(seed: u8) -> Vec<u8> {
        let format = PacketFormat::new(PacketKind::S1);
        format.encode(&vec![seed; format.payload_len()]).unwrap()
    }

    #[test]
    fn test_record_writes_frames_until_cancelled() {
        let mock = MockTransport::new();
        let frames = [s1_frame(1), s1_frame(2)].concat();
        mock.feed(&[0x00, 0x55]);
        mock.feed(&frames);

        let cancel = CancelToken::new();
        let stopper = cancel.clone();
        let timer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            stopper.cancel();
        });
        let (summary, sink) =
            record(mock, PacketFormat::new(PacketKind::S1), Vec::new(), 100, cancel).unwrap();
        timer.join().unwrap();

        assert_eq!(summary.frames, 2);
        assert_eq!(sink, frames);
    }

    #[test]
    fn test_record_ends_when_link_fails() {
        let mock = MockTransport::new();
        mock.disconnect();
        let cancel = CancelToken::new();

        let err = record(mock, PacketFormat::new(PacketKind::S1), Vec::new(), 100, cancel.clone())
            .unwrap_err();
        assert!(format!("{err:#}").contains("Stream failed"));
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_open_log_detects_fm_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fm.bin");
        let format = PacketFormat::fm(4, false).unwrap();
        let frame = format.encode(&vec![0u8; format.payload_len()]).unwrap();
        std::fs::write(&path, [frame.clone(), frame].concat()).unwrap();

        let replay = open_log(&path, PacketKind::Fm).unwrap();
        let samples: Vec<_> = replay.map(|r| r.unwrap()).collect();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].sample.chips, Some(4));
    }
}
