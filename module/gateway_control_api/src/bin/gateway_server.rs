//! Gateway server binary

use gateway_control_api::{ serve, ServerConfig };
use gateway_telemetry::{ init_logging, LogLevel };

#[ tokio::main ]
async fn main()
{
  if let Err( err ) = init_logging( LogLevel::Info )
  {
    eprintln!( "logging setup failed: {err}" );
  }

  let config = match ServerConfig::load()
  {
    Ok( config ) => config,
    Err( err ) =>
    {
      tracing::error!( error = %err, "configuration invalid" );
      std::process::exit( 1 );
    }
  };

  if let Err( err ) = serve( config ).await
  {
    tracing::error!( error = %err, "server exited with error" );
    std::process::exit( 1 );
  }
}
