//! Cost arithmetic
//!
//! Prices in the catalog are USD per million tokens. Missing pricing means
//! cost 0; the event is still recorded so the gap is visible in usage.

use gateway_catalog::CatalogModel;

/// Actual cost of a completed request
#[ must_use ]
pub fn actual_cost_usd( model: &CatalogModel, prompt_tokens: i64, completion_tokens: i64 ) -> f64
{
  ( prompt_tokens.max( 0 ) as f64 / 1e6 ) * model.price_input_per_mtoken_usd
    + ( completion_tokens.max( 0 ) as f64 / 1e6 ) * model.price_output_per_mtoken_usd
}

/// Admission-time estimate: the token estimate priced at the blended rate
#[ must_use ]
pub fn estimated_cost_usd( model: &CatalogModel, estimated_tokens: i64 ) -> f64
{
  let blended_per_token =
    ( model.price_input_per_mtoken_usd + model.price_output_per_mtoken_usd ) / 2e6;
  estimated_tokens.max( 0 ) as f64 * blended_per_token
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use gateway_catalog::DeploymentInfo;
  use gateway_types::{ ModelType, ProviderFamily };

  fn model( input_price: f64, output_price: f64 ) -> CatalogModel
  {
    CatalogModel
    {
      alias: "gpt-4o".to_string(),
      provider: ProviderFamily::Openai,
      provider_model: "gpt-4o-2024-08-06".to_string(),
      model_type: ModelType::Chat,
      enabled: true,
      price_input_per_mtoken_usd: input_price,
      price_output_per_mtoken_usd: output_price,
      credentials_ref: "openai-main".to_string(),
      deployments: Vec::< DeploymentInfo >::new(),
    }
  }

  #[ test ]
  fn test_actual_cost_splits_prompt_and_completion()
  {
    let model = model( 10.0, 30.0 );
    let cost = actual_cost_usd( &model, 100_000, 50_000 );
    // 0.1M * $10 + 0.05M * $30
    assert!( ( cost - 2.5 ).abs() < 1e-9 );
  }

  #[ test ]
  fn test_estimated_cost_uses_blended_rate()
  {
    let model = model( 2.0, 6.0 );
    let cost = estimated_cost_usd( &model, 1_000_000 );
    // (2 + 6) / 2 dollars per million
    assert!( ( cost - 4.0 ).abs() < 1e-9 );
  }

  #[ test ]
  fn test_missing_pricing_costs_zero()
  {
    let model = model( 0.0, 0.0 );
    assert_eq!( actual_cost_usd( &model, 1000, 1000 ), 0.0 );
    assert_eq!( estimated_cost_usd( &model, 1000 ), 0.0 );
  }
}
