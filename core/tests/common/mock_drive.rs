/// File-backed device images
///
/// Lets verification read real bytes without touching block devices.
use std::io::Write;
use tempfile::NamedTempFile;
use wipe_attest::DeviceDescriptor;

pub struct MockDrive {
    pub temp_file: NamedTempFile,
    pub descriptor: DeviceDescriptor,
}

impl MockDrive {
    /// Image filled with non-zero "user data"
    pub fn with_data(size_bytes: usize, bus_type: &str) -> std::io::Result<Self> {
        let mut temp_file = NamedTempFile::new()?;
        let data: Vec<u8> = (0..size_bytes).map(|i| ((i * 31 + 7) as u8) | 1).collect();
        temp_file.write_all(&data)?;
        temp_file.flush()?;

        let descriptor = DeviceDescriptor::new(
            temp_file.path().to_string_lossy(),
            bus_type,
            size_bytes as u64,
        )
        .with_model("Mock Disk");

        Ok(Self {
            temp_file,
            descriptor,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        self.temp_file.path()
    }
}
