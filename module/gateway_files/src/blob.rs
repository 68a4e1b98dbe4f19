//! Blob store backends
//!
//! Content lives outside the relational store. Keys are `tenant_id/file_id`
//! so tenant deletion maps to a prefix removal.

use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;

use gateway_types::{ GatewayError, Result };

/// Opaque content storage
#[ async_trait ]
pub trait BlobStore: Send + Sync + core::fmt::Debug
{
  async fn put( &self, key: &str, data: &[ u8 ] ) -> Result< () >;
  async fn open( &self, key: &str ) -> Result< Vec< u8 > >;
  async fn delete( &self, key: &str ) -> Result< () >;

  /// Backend label recorded on the file row
  fn backend_name( &self ) -> &'static str;
}

/// Filesystem-backed blobs under one root directory
#[ derive( Debug ) ]
pub struct FsBlobStore
{
  root: PathBuf,
}

impl FsBlobStore
{
  #[ must_use ]
  pub fn new( root: PathBuf ) -> Self
  {
    Self { root }
  }

  fn path_for( &self, key: &str ) -> Result< PathBuf >
  {
    if key.contains( ".." )
    {
      return Err( GatewayError::BadRequest( "invalid blob key".to_string() ) );
    }
    Ok( self.root.join( key ) )
  }
}

#[ async_trait ]
impl BlobStore for FsBlobStore
{
  async fn put( &self, key: &str, data: &[ u8 ] ) -> Result< () >
  {
    let path = self.path_for( key )?;
    if let Some( parent ) = path.parent()
    {
      tokio::fs::create_dir_all( parent )
        .await
        .map_err( |e| GatewayError::Internal( format!( "blob mkdir: {e}" ) ) )?;
    }

    tokio::fs::write( &path, data )
      .await
      .map_err( |e| GatewayError::Internal( format!( "blob write: {e}" ) ) )
  }

  async fn open( &self, key: &str ) -> Result< Vec< u8 > >
  {
    let path = self.path_for( key )?;
    tokio::fs::read( &path )
      .await
      .map_err( |e| match e.kind()
      {
        std::io::ErrorKind::NotFound => GatewayError::NotFound( "file content".to_string() ),
        _ => GatewayError::Internal( format!( "blob read: {e}" ) ),
      } )
  }

  async fn delete( &self, key: &str ) -> Result< () >
  {
    let path = self.path_for( key )?;
    match tokio::fs::remove_file( &path ).await
    {
      Ok( () ) => Ok( () ),
      Err( e ) if e.kind() == std::io::ErrorKind::NotFound => Ok( () ),
      Err( e ) => Err( GatewayError::Internal( format!( "blob delete: {e}" ) ) ),
    }
  }

  fn backend_name( &self ) -> &'static str
  {
    "fs"
  }
}

/// In-memory blobs for tests
#[ derive( Debug, Default ) ]
pub struct MemoryBlobStore
{
  blobs: DashMap< String, Vec< u8 > >,
}

impl MemoryBlobStore
{
  #[ must_use ]
  pub fn new() -> Self
  {
    Self::default()
  }
}

#[ async_trait ]
impl BlobStore for MemoryBlobStore
{
  async fn put( &self, key: &str, data: &[ u8 ] ) -> Result< () >
  {
    self.blobs.insert( key.to_string(), data.to_vec() );
    Ok( () )
  }

  async fn open( &self, key: &str ) -> Result< Vec< u8 > >
  {
    self.blobs
      .get( key )
      .map( |entry| entry.clone() )
      .ok_or_else( || GatewayError::NotFound( "file content".to_string() ) )
  }

  async fn delete( &self, key: &str ) -> Result< () >
  {
    self.blobs.remove( key );
    Ok( () )
  }

  fn backend_name( &self ) -> &'static str
  {
    "memory"
  }
}
