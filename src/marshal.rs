use std::{
  collections::HashMap,
  io::{ Read, Write },
  path::Path,
};

use serde::{ Serialize, Deserialize, de::DeserializeOwned };

use crate::{
  error::{ Error, Result },
  tensor::Tensor,
  layer::{ Layer, Dense, Convolutional, Pool, Relu, Sigmoid, Softmax, Reshaper },
  network::Network,
};


/// Self-describing collection of named binary entries.
///
/// Layers persist an `info` entry with their configuration plus one entry
/// per parameter tensor. Composite layers nest further archives.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Archive {
  entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
  pub name: String,
  pub bytes: Vec<u8>,
}

impl Archive {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn entries(&self) -> &[Entry] {
    &self.entries
  }

  /// Store `bytes` under `name`, replacing an existing entry.

  pub fn put(&mut self, name: &str, bytes: Vec<u8>) {
    match self.entries.iter_mut().find(|e| e.name == name ) {
      Some(entry) => entry.bytes = bytes,
      None => self.entries.push(Entry { name: name.to_string(), bytes }),
    }
  }

  pub fn get(&self, name: &str) -> Result<&[u8]> {
    self.entries.iter()
      .find(|e| e.name == name )
      .map(|e| &e.bytes[..] )
      .ok_or_else(|| Error::NotFound(format!("archive has no entry {name}")) )
  }

  pub fn put_value<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<()> {
    self.put(name, postcard::to_allocvec(value)?);
    Ok(())
  }

  pub fn value<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
    Ok(postcard::from_bytes(self.get(name)?)?)
  }

  pub fn put_info<T: Serialize>(&mut self, info: &T) -> Result<()> {
    self.put_value("info", info)
  }

  pub fn info<T: DeserializeOwned>(&self) -> Result<T> {
    self.value("info")
  }

  pub fn put_tensor(&mut self, name: &str, tensor: &Tensor) -> Result<()> {
    self.put_value(name, tensor)
  }

  pub fn tensor(&self, name: &str) -> Result<Tensor> {
    self.value(name)
  }

  pub fn put_archive(&mut self, name: &str, archive: &Archive) -> Result<()> {
    self.put_value(name, archive)
  }

  pub fn archive(&self, name: &str) -> Result<Archive> {
    self.value(name)
  }

  pub fn to_bytes(&self) -> Result<Vec<u8>> {
    Ok(postcard::to_allocvec(self)?)
  }

  pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
    Ok(postcard::from_bytes(bytes)?)
  }
}


pub type Unmarshaller = fn(&Archive, &Registry) -> Result<Box<dyn Layer>>;

/// Maps layer kinds to the functions that restore them.

#[derive(Clone, Default)]
pub struct Registry {
  formats: HashMap<String, Unmarshaller>,
}

impl Registry {
  /// An empty registry.

  pub fn new() -> Self {
    Self::default()
  }

  /// Registry knowing all built-in layers.

  pub fn standard() -> Self {
    let mut registry = Self::new();
    registry.register(Dense::KIND, Dense::unmarshal);
    registry.register(Convolutional::KIND, Convolutional::unmarshal);
    registry.register(Pool::KIND, Pool::unmarshal);
    registry.register(Relu::KIND, Relu::unmarshal);
    registry.register(Sigmoid::KIND, Sigmoid::unmarshal);
    registry.register(Softmax::KIND, Softmax::unmarshal);
    registry.register(Reshaper::KIND, Reshaper::unmarshal);
    registry.register(Network::KIND, Network::unmarshal);
    registry
  }

  pub fn register(&mut self, kind: &str, unmarshal: Unmarshaller) {
    self.formats.insert(kind.to_string(), unmarshal);
  }

  pub fn contains(&self, kind: &str) -> bool {
    self.formats.contains_key(kind)
  }

  pub fn unmarshal(&self, kind: &str, archive: &Archive) -> Result<Box<dyn Layer>> {
    let unmarshal = self.formats.get(kind)
      .ok_or_else(|| Error::NotFound(format!("no format registered for {kind}")) )?;
    unmarshal(archive, self)
  }
}

impl std::fmt::Debug for Registry {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    f.debug_set().entries(self.formats.keys()).finish()
  }
}


/// Wrap a layer's archive in an entry named `{id}.{kind}`.

pub fn pack(layer: &dyn Layer) -> Result<Archive> {
  let mut archive = Archive::new();
  archive.put_archive(&entry_name(layer), &layer.marshal()?)?;
  Ok(archive)
}

/// Restore a layer from an archive produced by [pack].

pub fn unpack(archive: &Archive, registry: &Registry) -> Result<Box<dyn Layer>> {
  let entry = match archive.entries() {
    [entry] => entry,
    _ => return Err(Error::NotFound(format!(
      "expected a single layer entry, found {}", archive.entries().len()))),
  };
  let (_, kind) = split_name(&entry.name)?;
  registry.unmarshal(kind, &Archive::from_bytes(&entry.bytes)?)
}

pub(crate) fn entry_name(layer: &dyn Layer) -> String {
  format!("{}.{}", layer.id(), layer.kind())
}

pub(crate) fn split_name(name: &str) -> Result<(&str, &str)> {
  name.rsplit_once('.')
    .ok_or_else(|| Error::NotFound(format!("entry {name} doesn't name a layer kind")) )
}

pub fn write(layer: &dyn Layer, mut writer: impl Write) -> Result<()> {
  writer.write_all(&pack(layer)?.to_bytes()?)?;
  Ok(())
}

pub fn read(mut reader: impl Read, registry: &Registry) -> Result<Box<dyn Layer>> {
  let mut bytes = vec![];
  reader.read_to_end(&mut bytes)?;
  unpack(&Archive::from_bytes(&bytes)?, registry)
}

pub fn save(layer: &dyn Layer, path: impl AsRef<Path>) -> Result<()> {
  let mut writer = std::io::BufWriter::new(std::fs::File::create(path)?);
  write(layer, &mut writer)?;
  writer.flush()?;
  Ok(())
}

pub fn load(path: impl AsRef<Path>, registry: &Registry) -> Result<Box<dyn Layer>> {
  let file = std::fs::File::open(path)?;
  read(std::io::BufReader::new(file), registry)
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::layer::testing::assert_close;

  fn round_trip(layer: &dyn Layer) -> Box<dyn Layer> {
    let mut bytes = vec![];
    write(layer, &mut bytes).unwrap();
    read(&bytes[..], &Registry::standard()).unwrap()
  }

  #[test]
  fn entries() {
    let mut archive = Archive::new();
    archive.put_value("a", &3u32).unwrap();
    archive.put_value("a", &4u32).unwrap();
    assert_eq!(archive.entries().len(), 1);
    assert_eq!(archive.value::<u32>("a").unwrap(), 4);
    assert!(matches!(archive.get("b"), Err(Error::NotFound(_))));
  }

  #[test]
  fn dense() {
    let mut layer = Dense::new(3, 2);
    let mut restored = round_trip(&layer);
    assert_eq!(restored.id(), layer.id());
    assert_eq!(restored.kind(), "dense");
    assert_eq!(restored.input_shape(), &[3]);
    assert_eq!(restored.output_shape(), &[2]);
    let input = Tensor::vec(&[0.5, 0.123, 0.7784]).unwrap();
    let a = layer.activate(&input).unwrap();
    let b = restored.activate(&input).unwrap();
    assert_close(a.values(), b.values(), 1e-8);
  }

  #[test]
  fn every_layer_kind() {
    let layers: Vec<Box<dyn Layer>> = vec![
      Box::new(Convolutional::new([5,5,2], 3, [1,1], [2,2], [0,0])),
      Box::new(Pool::new(&[4,4,2], &[2,2,1])),
      Box::new(Relu::leaky(&[3,2])),
      Box::new(Sigmoid::new(&[4])),
      Box::new(Softmax::new(&[4])),
      Box::new(Reshaper::new(&[2,3], &[6])),
    ];
    for mut layer in layers {
      let mut restored = round_trip(&*layer);
      assert_eq!(restored.id(), layer.id());
      assert_eq!(restored.kind(), layer.kind());
      assert_eq!(restored.output_shape(), layer.output_shape());
      let size = layer.input_shape().iter().product::<usize>();
      let input = Tensor::new(layer.input_shape(), (0..size).map(|i| (i as f64 * 0.37).sin() ).collect()).unwrap();
      let a = layer.activate(&input).unwrap();
      let b = restored.activate(&input).unwrap();
      assert_eq!(a, b);
    }
  }

  #[test]
  fn unknown_format() {
    let layer = Sigmoid::new(&[2]);
    let archive = pack(&layer).unwrap();
    assert!(matches!(unpack(&archive, &Registry::new()), Err(Error::NotFound(_))));
    assert!(matches!(unpack(&Archive::new(), &Registry::standard()), Err(Error::NotFound(_))));
  }

  #[test]
  fn files() {
    let path = std::env::temp_dir().join(format!("dagnet-{}.bin", std::process::id()));
    let layer = Dense::new(4, 3);
    save(&layer, &path).unwrap();
    let restored = load(&path, &Registry::standard()).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(restored.id(), layer.id());
    assert!(matches!(load(&path, &Registry::standard()), Err(Error::Io(_))));
  }
}
