//! Free-form admin settings
//!
//! File limits, batch settings and the default-model set are JSON values in
//! a small KV table; the snapshot builder reads them all at once.

use gateway_types::{ BatchSettings, FileSettings, GatewayError, Result };

use crate::{ db_err, now_ms, Store };

const KEY_FILE_SETTINGS: &str = "file_settings";
const KEY_BATCH_SETTINGS: &str = "batch_settings";
const KEY_DEFAULT_MODELS: &str = "default_models";

impl Store
{
  async fn get_setting< T: serde::de::DeserializeOwned >( &self, key: &str ) -> Result< Option< T > >
  {
    let value: Option< String > = sqlx::query_scalar( "SELECT value FROM gateway_settings WHERE key = $1" )
      .bind( key )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( value.and_then( |raw| serde_json::from_str( &raw ).ok() ) )
  }

  async fn put_setting< T: serde::Serialize >( &self, key: &str, value: &T ) -> Result< () >
  {
    let raw = serde_json::to_string( value )
      .map_err( |e| GatewayError::Internal( format!( "encode setting {key}: {e}" ) ) )?;

    sqlx::query(
      "INSERT INTO gateway_settings (key, value, updated_at) VALUES ($1, $2, $3) \
       ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"
    )
    .bind( key )
    .bind( raw )
    .bind( now_ms() )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    Ok( () )
  }

  /// File service settings, falling back to compiled defaults
  pub async fn file_settings( &self ) -> Result< FileSettings >
  {
    Ok( self.get_setting( KEY_FILE_SETTINGS ).await?.unwrap_or_default() )
  }

  /// Replace file service settings
  pub async fn set_file_settings( &self, settings: &FileSettings ) -> Result< () >
  {
    self.put_setting( KEY_FILE_SETTINGS, settings ).await
  }

  /// Batch engine settings, falling back to compiled defaults
  pub async fn batch_settings( &self ) -> Result< BatchSettings >
  {
    Ok( self.get_setting( KEY_BATCH_SETTINGS ).await?.unwrap_or_default() )
  }

  /// Replace batch engine settings
  pub async fn set_batch_settings( &self, settings: &BatchSettings ) -> Result< () >
  {
    self.put_setting( KEY_BATCH_SETTINGS, settings ).await
  }

  /// Aliases available to every tenant without an explicit grant
  pub async fn default_models( &self ) -> Result< Vec< String > >
  {
    Ok( self.get_setting( KEY_DEFAULT_MODELS ).await?.unwrap_or_default() )
  }

  /// Replace the default-model set (lowercased)
  pub async fn set_default_models( &self, aliases: &[ String ] ) -> Result< () >
  {
    let lowered: Vec< String > = aliases.iter().map( |a| a.to_lowercase() ).collect();
    self.put_setting( KEY_DEFAULT_MODELS, &lowered ).await
  }
}
