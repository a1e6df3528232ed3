//! Named-feature access to device registers.
//!
//! A [`FeatureSchema`] maps symbolic feature names onto typed register
//! definitions; a [`FeatureRegistry`] resolves names into cached accessor
//! handles ([`IntegerFeature`], [`CommandFeature`]) bound to the device's
//! control port. Callers resolve a handle once at configuration time and
//! reuse it, so the `NotFound` path is hit during setup rather than on every
//! access.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::protocol::registers;

/// Standard feature names understood by the default schema.
pub mod names {
    pub const WIDTH: &str = "Width";
    pub const HEIGHT: &str = "Height";
    pub const BINNING_HORIZONTAL: &str = "BinningHorizontal";
    pub const BINNING_VERTICAL: &str = "BinningVertical";
    pub const PAYLOAD_SIZE: &str = "PayloadSize";
    pub const SENSOR_WIDTH: &str = "SensorWidth";
    pub const SENSOR_HEIGHT: &str = "SensorHeight";
    pub const ACQUISITION_START: &str = "AcquisitionStart";
    pub const ACQUISITION_STOP: &str = "AcquisitionStop";
}

// =============================================================================
// Control port
// =============================================================================

/// Register-level access to a camera's control channel.
///
/// Implementations are not required to be safe for concurrent calls; the
/// crate serializes access through a shared mutex and issues operations from
/// the control thread only.
pub trait ControlPort: Send {
    /// Read a 32-bit register.
    fn read_register(&mut self, address: u32) -> Result<u32>;

    /// Write a 32-bit register.
    fn write_register(&mut self, address: u32, value: u32) -> Result<()>;

    /// Read `buf.len()` bytes of device memory starting at `address`.
    fn read_memory(&mut self, address: u32, buf: &mut [u8]) -> Result<()>;
}

/// A control port shared between the device handle and feature accessors.
pub type SharedPort = Arc<Mutex<Box<dyn ControlPort>>>;

/// Wrap a boxed port for sharing.
pub fn share_port(port: Box<dyn ControlPort>) -> SharedPort {
    Arc::new(Mutex::new(port))
}

pub(crate) fn lock_port(port: &SharedPort) -> Result<MutexGuard<'_, Box<dyn ControlPort>>> {
    port.lock()
        .map_err(|_| Error::invalid_state("control port lock poisoned"))
}

// =============================================================================
// Schema
// =============================================================================

/// Definition of an integer feature: register address plus static bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerDef {
    pub address: u32,
    pub min: i64,
    pub max: i64,
}

/// Definition of a command feature: the register and value that trigger it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDef {
    pub address: u32,
    pub value: u32,
}

/// Mapping from feature names to typed register definitions.
///
/// A real device would publish this as part of its GenICam description; the
/// crate treats it as plain data so tests and the built-in default layout can
/// construct it directly.
#[derive(Debug, Clone, Default)]
pub struct FeatureSchema {
    integers: HashMap<String, IntegerDef>,
    commands: HashMap<String, CommandDef>,
}

impl FeatureSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an integer feature (builder pattern).
    pub fn with_integer(mut self, name: &str, address: u32, min: i64, max: i64) -> Self {
        self.integers
            .insert(name.to_string(), IntegerDef { address, min, max });
        self
    }

    /// Add a command feature (builder pattern).
    pub fn with_command(mut self, name: &str, address: u32, value: u32) -> Self {
        self.commands
            .insert(name.to_string(), CommandDef { address, value });
        self
    }

    /// The default feature layout used for discovery-built devices.
    ///
    /// Bounds are deliberately permissive; per-device limits belong to the
    /// device description, which this layout only stands in for.
    pub fn default_layout() -> Self {
        Self::new()
            .with_integer(names::WIDTH, registers::WIDTH, 1, 16384)
            .with_integer(names::HEIGHT, registers::HEIGHT, 1, 16384)
            .with_integer(names::BINNING_HORIZONTAL, registers::BINNING_HORIZONTAL, 1, 16)
            .with_integer(names::BINNING_VERTICAL, registers::BINNING_VERTICAL, 1, 16)
            .with_integer(names::PAYLOAD_SIZE, registers::PAYLOAD_SIZE, 0, u32::MAX as i64)
            .with_integer(names::SENSOR_WIDTH, registers::SENSOR_WIDTH, 0, u32::MAX as i64)
            .with_integer(names::SENSOR_HEIGHT, registers::SENSOR_HEIGHT, 0, u32::MAX as i64)
            .with_command(names::ACQUISITION_START, registers::ACQUISITION_START, 1)
            .with_command(names::ACQUISITION_STOP, registers::ACQUISITION_STOP, 1)
    }

    fn integer(&self, name: &str) -> Option<IntegerDef> {
        self.integers.get(name).copied()
    }

    fn command(&self, name: &str) -> Option<CommandDef> {
        self.commands.get(name).copied()
    }
}

// =============================================================================
// Feature accessors
// =============================================================================

/// A resolved integer feature handle.
///
/// Reads and writes go through the device's control port; bounds are the
/// static ones declared by the schema.
#[derive(Clone)]
pub struct IntegerFeature {
    name: String,
    def: IntegerDef,
    port: SharedPort,
}

impl std::fmt::Debug for IntegerFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegerFeature")
            .field("name", &self.name)
            .field("def", &self.def)
            .finish_non_exhaustive()
    }
}

impl IntegerFeature {
    /// The feature name this handle was resolved from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the feature's current value from the device.
    pub fn value(&self) -> Result<i64> {
        let mut port = lock_port(&self.port)?;
        Ok(port.read_register(self.def.address)? as i64)
    }

    /// Request the device set the feature to `value`.
    ///
    /// Fails with [`Error::OutOfRange`] outside `[minimum, maximum]` without
    /// touching the device.
    pub fn set_value(&self, value: i64) -> Result<()> {
        if value < self.def.min || value > self.def.max {
            return Err(Error::OutOfRange {
                feature: self.name.clone(),
                value,
                min: self.def.min,
                max: self.def.max,
            });
        }
        let mut port = lock_port(&self.port)?;
        port.write_register(self.def.address, value as u32)
    }

    /// Lower bound accepted by `set_value`.
    pub fn minimum(&self) -> i64 {
        self.def.min
    }

    /// Upper bound accepted by `set_value`.
    pub fn maximum(&self) -> i64 {
        self.def.max
    }
}

/// A resolved command feature handle.
#[derive(Clone)]
pub struct CommandFeature {
    name: String,
    def: CommandDef,
    port: SharedPort,
}

impl std::fmt::Debug for CommandFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandFeature")
            .field("name", &self.name)
            .field("def", &self.def)
            .finish_non_exhaustive()
    }
}

impl CommandFeature {
    /// The command name this handle was resolved from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Trigger the device action. Fire-and-forget: there is no result beyond
    /// the transport-level acknowledge.
    pub fn execute(&self) -> Result<()> {
        let mut port = lock_port(&self.port)?;
        port.write_register(self.def.address, self.def.value)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Resolves feature names into typed accessor handles.
pub struct FeatureRegistry {
    schema: FeatureSchema,
    port: SharedPort,
}

impl FeatureRegistry {
    /// Create a registry over a schema and shared control port.
    pub fn new(schema: FeatureSchema, port: SharedPort) -> Self {
        Self { schema, port }
    }

    /// Resolve an integer feature by name.
    pub fn integer(&self, name: &str) -> Result<IntegerFeature> {
        let def = self
            .schema
            .integer(name)
            .ok_or_else(|| Error::not_found(name))?;
        Ok(IntegerFeature {
            name: name.to_string(),
            def,
            port: Arc::clone(&self.port),
        })
    }

    /// Resolve a command feature by name.
    pub fn command(&self, name: &str) -> Result<CommandFeature> {
        let def = self
            .schema
            .command(name)
            .ok_or_else(|| Error::not_found(name))?;
        Ok(CommandFeature {
            name: name.to_string(),
            def,
            port: Arc::clone(&self.port),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory control port for unit testing feature access.
    pub(crate) struct MemoryPort {
        regs: Arc<Mutex<HashMap<u32, u32>>>,
        memory: Vec<u8>,
    }

    impl MemoryPort {
        pub(crate) fn new() -> (Self, Arc<Mutex<HashMap<u32, u32>>>) {
            let regs = Arc::new(Mutex::new(HashMap::new()));
            (
                Self {
                    regs: Arc::clone(&regs),
                    memory: vec![0xee; 0x20000],
                },
                regs,
            )
        }
    }

    impl ControlPort for MemoryPort {
        fn read_register(&mut self, address: u32) -> Result<u32> {
            Ok(*self.regs.lock().unwrap().get(&address).unwrap_or(&0))
        }

        fn write_register(&mut self, address: u32, value: u32) -> Result<()> {
            self.regs.lock().unwrap().insert(address, value);
            Ok(())
        }

        fn read_memory(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
            let start = address as usize;
            buf.copy_from_slice(&self.memory[start..start + buf.len()]);
            Ok(())
        }
    }

    fn test_registry() -> (FeatureRegistry, Arc<Mutex<HashMap<u32, u32>>>) {
        let (port, regs) = MemoryPort::new();
        let schema = FeatureSchema::new()
            .with_integer(names::WIDTH, registers::WIDTH, 1, 1280)
            .with_command(names::ACQUISITION_START, registers::ACQUISITION_START, 1);
        (
            FeatureRegistry::new(schema, share_port(Box::new(port))),
            regs,
        )
    }

    #[test]
    fn test_unknown_feature_is_not_found() {
        let (registry, _) = test_registry();
        let err = registry.integer("NoSuchFeature").unwrap_err();
        assert!(err.is_not_found());
        let err = registry.command("NoSuchCommand").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_write_then_read_round_trips() {
        let (registry, _) = test_registry();
        let width = registry.integer(names::WIDTH).unwrap();
        width.set_value(640).unwrap();
        assert_eq!(width.value().unwrap(), 640);
    }

    #[test]
    fn test_out_of_range_write_rejected_without_mutation() {
        let (registry, _) = test_registry();
        let width = registry.integer(names::WIDTH).unwrap();
        width.set_value(800).unwrap();

        let err = width.set_value(5000).unwrap_err();
        assert!(err.is_out_of_range());
        let err = width.set_value(0).unwrap_err();
        assert!(err.is_out_of_range());

        // The device register still holds the last accepted value.
        assert_eq!(width.value().unwrap(), 800);
    }

    #[test]
    fn test_bounds_come_from_schema() {
        let (registry, _) = test_registry();
        let width = registry.integer(names::WIDTH).unwrap();
        assert_eq!(width.minimum(), 1);
        assert_eq!(width.maximum(), 1280);
    }

    #[test]
    fn test_command_execute_writes_trigger_register() {
        let (registry, regs) = test_registry();
        let start = registry.command(names::ACQUISITION_START).unwrap();
        start.execute().unwrap();
        assert_eq!(
            regs.lock().unwrap().get(&registers::ACQUISITION_START),
            Some(&1)
        );
    }
}
