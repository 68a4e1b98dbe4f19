//! Closed vocabularies shared between the store, the engines and the wire
//!
//! Every enum round-trips through its `as_str` form; that form is what the
//! database TEXT columns and the JSON surfaces carry.

use serde::{ Deserialize, Serialize };

/// Tenant lifecycle status
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "snake_case" ) ]
pub enum TenantStatus
{
  Active,
  Suspended,
}

impl TenantStatus
{
  #[ must_use ]
  pub fn as_str( self ) -> &'static str
  {
    match self
    {
      Self::Active => "active",
      Self::Suspended => "suspended",
    }
  }

  #[ must_use ]
  pub fn parse( s: &str ) -> Option< Self >
  {
    match s
    {
      "active" => Some( Self::Active ),
      "suspended" => Some( Self::Suspended ),
      _ => None,
    }
  }
}

/// Membership role within a tenant, strongest first
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "snake_case" ) ]
pub enum MembershipRole
{
  Owner,
  Admin,
  Viewer,
  User,
}

impl MembershipRole
{
  #[ must_use ]
  pub fn as_str( self ) -> &'static str
  {
    match self
    {
      Self::Owner => "owner",
      Self::Admin => "admin",
      Self::Viewer => "viewer",
      Self::User => "user",
    }
  }

  #[ must_use ]
  pub fn parse( s: &str ) -> Option< Self >
  {
    match s
    {
      "owner" => Some( Self::Owner ),
      "admin" => Some( Self::Admin ),
      "viewer" => Some( Self::Viewer ),
      "user" => Some( Self::User ),
      _ => None,
    }
  }

  /// Numeric rank: higher outranks lower
  #[ must_use ]
  pub fn rank( self ) -> u8
  {
    match self
    {
      Self::Owner => 3,
      Self::Admin => 2,
      Self::Viewer => 1,
      Self::User => 0,
    }
  }

  /// Whether this role is allowed to act as `required`
  #[ must_use ]
  pub fn at_least( self, required: Self ) -> bool
  {
    self.rank() >= required.rank()
  }
}

/// API key flavour
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "snake_case" ) ]
pub enum ApiKeyKind
{
  Tenant,
  Personal,
}

impl ApiKeyKind
{
  #[ must_use ]
  pub fn as_str( self ) -> &'static str
  {
    match self
    {
      Self::Tenant => "tenant",
      Self::Personal => "personal",
    }
  }

  #[ must_use ]
  pub fn parse( s: &str ) -> Option< Self >
  {
    match s
    {
      "tenant" => Some( Self::Tenant ),
      "personal" => Some( Self::Personal ),
      _ => None,
    }
  }
}

/// Catalog entry modality
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "snake_case" ) ]
pub enum ModelType
{
  Chat,
  Embedding,
  Image,
  AudioTranscription,
  AudioTranslation,
  AudioSpeech,
  Rerank,
}

impl ModelType
{
  #[ must_use ]
  pub fn as_str( self ) -> &'static str
  {
    match self
    {
      Self::Chat => "chat",
      Self::Embedding => "embedding",
      Self::Image => "image",
      Self::AudioTranscription => "audio_transcription",
      Self::AudioTranslation => "audio_translation",
      Self::AudioSpeech => "audio_speech",
      Self::Rerank => "rerank",
    }
  }

  #[ must_use ]
  pub fn parse( s: &str ) -> Option< Self >
  {
    match s
    {
      "chat" => Some( Self::Chat ),
      "embedding" => Some( Self::Embedding ),
      "image" => Some( Self::Image ),
      "audio_transcription" => Some( Self::AudioTranscription ),
      "audio_translation" => Some( Self::AudioTranslation ),
      "audio_speech" => Some( Self::AudioSpeech ),
      "rerank" => Some( Self::Rerank ),
      _ => None,
    }
  }
}

/// Upstream provider family; decides the wire translation
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "snake_case" ) ]
pub enum ProviderFamily
{
  Openai,
  AzureOpenai,
  Anthropic,
  Bedrock,
  Vertex,
  OpenaiCompatible,
}

impl ProviderFamily
{
  #[ must_use ]
  pub fn as_str( self ) -> &'static str
  {
    match self
    {
      Self::Openai => "openai",
      Self::AzureOpenai => "azure_openai",
      Self::Anthropic => "anthropic",
      Self::Bedrock => "bedrock",
      Self::Vertex => "vertex",
      Self::OpenaiCompatible => "openai_compatible",
    }
  }

  #[ must_use ]
  pub fn parse( s: &str ) -> Option< Self >
  {
    match s
    {
      "openai" => Some( Self::Openai ),
      "azure_openai" => Some( Self::AzureOpenai ),
      "anthropic" => Some( Self::Anthropic ),
      "bedrock" => Some( Self::Bedrock ),
      "vertex" => Some( Self::Vertex ),
      "openai_compatible" => Some( Self::OpenaiCompatible ),
      _ => None,
    }
  }
}

/// Batch lifecycle states
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "snake_case" ) ]
pub enum BatchStatus
{
  Validating,
  InProgress,
  Finalizing,
  Completed,
  Failed,
  Cancelled,
  Expired,
}

impl BatchStatus
{
  #[ must_use ]
  pub fn as_str( self ) -> &'static str
  {
    match self
    {
      Self::Validating => "validating",
      Self::InProgress => "in_progress",
      Self::Finalizing => "finalizing",
      Self::Completed => "completed",
      Self::Failed => "failed",
      Self::Cancelled => "cancelled",
      Self::Expired => "expired",
    }
  }

  #[ must_use ]
  pub fn parse( s: &str ) -> Option< Self >
  {
    match s
    {
      "validating" => Some( Self::Validating ),
      "in_progress" => Some( Self::InProgress ),
      "finalizing" => Some( Self::Finalizing ),
      "completed" => Some( Self::Completed ),
      "failed" => Some( Self::Failed ),
      "cancelled" => Some( Self::Cancelled ),
      "expired" => Some( Self::Expired ),
      _ => None,
    }
  }

  /// Terminal states accept no further transitions
  #[ must_use ]
  pub fn is_terminal( self ) -> bool
  {
    matches!( self, Self::Completed | Self::Failed | Self::Cancelled | Self::Expired )
  }

  /// Forward-only transition check
  #[ must_use ]
  pub fn can_transition_to( self, next: Self ) -> bool
  {
    if self.is_terminal()
    {
      return false;
    }

    match next
    {
      Self::InProgress => self == Self::Validating,
      Self::Finalizing => self == Self::InProgress,
      Self::Completed => self == Self::Finalizing,
      Self::Failed => true,
      Self::Cancelled => matches!( self, Self::Validating | Self::InProgress | Self::Finalizing ),
      Self::Expired => true,
      Self::Validating => false,
    }
  }
}

/// Stored file lifecycle status
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "snake_case" ) ]
pub enum FileStatus
{
  Uploaded,
  Processing,
  Processed,
  Deleted,
  Error,
}

impl FileStatus
{
  #[ must_use ]
  pub fn as_str( self ) -> &'static str
  {
    match self
    {
      Self::Uploaded => "uploaded",
      Self::Processing => "processing",
      Self::Processed => "processed",
      Self::Deleted => "deleted",
      Self::Error => "error",
    }
  }

  #[ must_use ]
  pub fn parse( s: &str ) -> Option< Self >
  {
    match s
    {
      "uploaded" => Some( Self::Uploaded ),
      "processing" => Some( Self::Processing ),
      "processed" => Some( Self::Processed ),
      "deleted" => Some( Self::Deleted ),
      "error" => Some( Self::Error ),
      _ => None,
    }
  }
}

/// Declared purpose of an uploaded file
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "snake_case" ) ]
pub enum FilePurpose
{
  Batch,
  UserUpload,
  BatchOutput,
  BatchErrors,
}

impl FilePurpose
{
  #[ must_use ]
  pub fn as_str( self ) -> &'static str
  {
    match self
    {
      Self::Batch => "batch",
      Self::UserUpload => "user_upload",
      Self::BatchOutput => "batch_output",
      Self::BatchErrors => "batch_errors",
    }
  }

  #[ must_use ]
  pub fn parse( s: &str ) -> Option< Self >
  {
    match s
    {
      "batch" => Some( Self::Batch ),
      "user_upload" => Some( Self::UserUpload ),
      "batch_output" => Some( Self::BatchOutput ),
      "batch_errors" => Some( Self::BatchErrors ),
      _ => None,
    }
  }
}

/// Budget alert severity ladder
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "snake_case" ) ]
pub enum AlertLevel
{
  None,
  Warn,
  Exceed,
}

impl AlertLevel
{
  #[ must_use ]
  pub fn as_str( self ) -> &'static str
  {
    match self
    {
      Self::None => "none",
      Self::Warn => "warn",
      Self::Exceed => "exceed",
    }
  }

  #[ must_use ]
  pub fn parse( s: &str ) -> Option< Self >
  {
    match s
    {
      "none" => Some( Self::None ),
      "warn" => Some( Self::Warn ),
      "exceed" => Some( Self::Exceed ),
      _ => None,
    }
  }
}

/// Guardrail evaluation stage
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "snake_case" ) ]
pub enum GuardrailStage
{
  Prompt,
  Response,
}

impl GuardrailStage
{
  #[ must_use ]
  pub fn as_str( self ) -> &'static str
  {
    match self
    {
      Self::Prompt => "prompt",
      Self::Response => "response",
    }
  }
}

/// Outcome of a guardrail evaluation
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "snake_case" ) ]
pub enum GuardrailAction
{
  Allow,
  Warn,
  Block,
}

impl GuardrailAction
{
  #[ must_use ]
  pub fn as_str( self ) -> &'static str
  {
    match self
    {
      Self::Allow => "allow",
      Self::Warn => "warn",
      Self::Block => "block",
    }
  }

  #[ must_use ]
  pub fn parse( s: &str ) -> Option< Self >
  {
    match s
    {
      "allow" => Some( Self::Allow ),
      "warn" => Some( Self::Warn ),
      "block" => Some( Self::Block ),
      _ => None,
    }
  }
}

/// Budget counter refresh schedule
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "snake_case" ) ]
pub enum RefreshSchedule
{
  CalendarMonth,
  Weekly,
  Rolling7d,
  Rolling30d,
}

impl RefreshSchedule
{
  #[ must_use ]
  pub fn as_str( self ) -> &'static str
  {
    match self
    {
      Self::CalendarMonth => "calendar_month",
      Self::Weekly => "weekly",
      Self::Rolling7d => "rolling_7d",
      Self::Rolling30d => "rolling_30d",
    }
  }

  #[ must_use ]
  pub fn parse( s: &str ) -> Option< Self >
  {
    match s
    {
      "calendar_month" => Some( Self::CalendarMonth ),
      "weekly" => Some( Self::Weekly ),
      "rolling_7d" => Some( Self::Rolling7d ),
      "rolling_30d" => Some( Self::Rolling30d ),
      _ => None,
    }
  }
}

/// Derived catalog status label for an alias
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "snake_case" ) ]
pub enum RouteStatus
{
  Online,
  Degraded,
  Offline,
  Disabled,
  Unknown,
}

impl RouteStatus
{
  #[ must_use ]
  pub fn as_str( self ) -> &'static str
  {
    match self
    {
      Self::Online => "online",
      Self::Degraded => "degraded",
      Self::Offline => "offline",
      Self::Disabled => "disabled",
      Self::Unknown => "unknown",
    }
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn role_ordering()
  {
    assert!( MembershipRole::Owner.at_least( MembershipRole::Admin ) );
    assert!( MembershipRole::Admin.at_least( MembershipRole::Admin ) );
    assert!( !MembershipRole::Viewer.at_least( MembershipRole::Admin ) );
    assert!( MembershipRole::Viewer.at_least( MembershipRole::User ) );
  }

  #[ test ]
  fn batch_transitions_are_forward_only()
  {
    assert!( BatchStatus::Validating.can_transition_to( BatchStatus::InProgress ) );
    assert!( BatchStatus::InProgress.can_transition_to( BatchStatus::Finalizing ) );
    assert!( BatchStatus::Finalizing.can_transition_to( BatchStatus::Completed ) );
    assert!( !BatchStatus::Completed.can_transition_to( BatchStatus::InProgress ) );
    assert!( !BatchStatus::InProgress.can_transition_to( BatchStatus::Validating ) );
    assert!( BatchStatus::Finalizing.can_transition_to( BatchStatus::Cancelled ) );
    assert!( !BatchStatus::Cancelled.can_transition_to( BatchStatus::Expired ) );
  }

  #[ test ]
  fn enums_round_trip_through_strings()
  {
    for schedule in [ RefreshSchedule::CalendarMonth, RefreshSchedule::Weekly, RefreshSchedule::Rolling7d, RefreshSchedule::Rolling30d ]
    {
      assert_eq!( RefreshSchedule::parse( schedule.as_str() ), Some( schedule ) );
    }
    for status in [ BatchStatus::Validating, BatchStatus::InProgress, BatchStatus::Finalizing, BatchStatus::Completed, BatchStatus::Failed, BatchStatus::Cancelled, BatchStatus::Expired ]
    {
      assert_eq!( BatchStatus::parse( status.as_str() ), Some( status ) );
    }
  }
}
