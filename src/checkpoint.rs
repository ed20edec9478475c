//! Binary parameter checkpoints.
//!
//! Layout (little-endian): an `i32` with the total number of stored values,
//! then every buffer returned by [`Layer::parameters`] as raw `f32`s, layer by
//! layer in chain order. Only values are stored, so a checkpoint can only be
//! loaded into a network compiled with the same architecture.

use crate::error::{NnError, Result};
use crate::layers::Layer;
use crate::network::Network;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::info;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

fn stored_count(layers: &[Box<dyn Layer>]) -> usize {
    layers
        .iter()
        .flat_map(|l| l.parameters())
        .map(|p| p.len())
        .sum()
}

/// Writes every layer's parameters to `writer`.
pub fn write_parameters<W: Write>(layers: &[Box<dyn Layer>], mut writer: W) -> Result<()> {
    let total = stored_count(layers);
    let total = i32::try_from(total)
        .map_err(|_| NnError::config(format!("{} parameters do not fit a checkpoint", total)))?;
    writer.write_i32::<LittleEndian>(total)?;
    for layer in layers {
        for buffer in layer.parameters() {
            for &value in buffer {
                writer.write_f32::<LittleEndian>(value)?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

/// Reads parameters written by [`write_parameters`] into `layers`.
///
/// Fails with `ShapeMismatch` when the stored count differs from what the
/// layers hold, and with `Io` when the data ends early. The layers are only
/// written once every value has been read.
pub fn read_parameters<R: Read>(layers: &mut [Box<dyn Layer>], mut reader: R) -> Result<()> {
    let stored = reader.read_i32::<LittleEndian>()?;
    let expected = stored_count(layers);
    if stored < 0 || stored as usize != expected {
        return Err(NnError::shape(format!(
            "checkpoint holds {} values but the network has {}",
            stored, expected
        )));
    }
    let mut values = vec![0.0f32; expected];
    reader.read_f32_into::<LittleEndian>(&mut values)?;

    let mut rest = values.as_slice();
    for layer in layers.iter_mut() {
        for buffer in layer.parameters_mut() {
            let (head, tail) = rest.split_at(buffer.len());
            buffer.copy_from_slice(head);
            rest = tail;
        }
    }
    Ok(())
}

impl Network {
    /// Saves the parameters to `path`, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        write_parameters(self.layers(), BufWriter::new(File::create(path)?))?;
        info!("saved checkpoint to {}", path.display());
        Ok(())
    }

    /// Loads parameters from `path` into a compiled network.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        if !self.is_compiled() {
            return Err(NnError::config(
                "compile the network before loading a checkpoint",
            ));
        }
        let path = path.as_ref();
        read_parameters(self.layers_mut(), BufReader::new(File::open(path)?))?;
        info!("loaded checkpoint from {}", path.display());
        Ok(())
    }
}
