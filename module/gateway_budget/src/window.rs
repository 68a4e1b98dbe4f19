//! Budget window arithmetic
//!
//! Calendar windows snap to UTC month and ISO-week boundaries; rolling
//! windows trail the current instant and re-derive spend from the event log
//! whenever they advance.

use chrono::{ Datelike, Duration, TimeZone, Utc };

use gateway_types::RefreshSchedule;

/// Milliseconds in a day
const DAY_MS: i64 = 24 * 3600 * 1000;

/// Granularity at which rolling windows advance
const ROLLING_STEP_MS: i64 = 5_000;

/// Compute `[start, end)` in epoch milliseconds for `now`
#[ must_use ]
pub fn window_for( schedule: RefreshSchedule, now_ms: i64 ) -> ( i64, i64 )
{
  match schedule
  {
    RefreshSchedule::CalendarMonth => calendar_month_window( now_ms ),
    RefreshSchedule::Weekly => weekly_window( now_ms ),
    RefreshSchedule::Rolling7d => ( now_ms - 7 * DAY_MS, now_ms + ROLLING_STEP_MS ),
    RefreshSchedule::Rolling30d => ( now_ms - 30 * DAY_MS, now_ms + ROLLING_STEP_MS ),
  }
}

/// Rolling schedules re-derive spend from usage events on every advance
#[ must_use ]
pub fn is_rolling( schedule: RefreshSchedule ) -> bool
{
  matches!( schedule, RefreshSchedule::Rolling7d | RefreshSchedule::Rolling30d )
}

fn calendar_month_window( now_ms: i64 ) -> ( i64, i64 )
{
  let now = match Utc.timestamp_millis_opt( now_ms )
  {
    chrono::LocalResult::Single( dt ) => dt,
    _ => Utc::now(),
  };

  let start = Utc
    .with_ymd_and_hms( now.year(), now.month(), 1, 0, 0, 0 )
    .single()
    .unwrap_or( now );

  let ( next_year, next_month ) = if now.month() == 12
  {
    ( now.year() + 1, 1 )
  }
  else
  {
    ( now.year(), now.month() + 1 )
  };

  let end = Utc
    .with_ymd_and_hms( next_year, next_month, 1, 0, 0, 0 )
    .single()
    .unwrap_or( now );

  ( start.timestamp_millis(), end.timestamp_millis() )
}

fn weekly_window( now_ms: i64 ) -> ( i64, i64 )
{
  let now = match Utc.timestamp_millis_opt( now_ms )
  {
    chrono::LocalResult::Single( dt ) => dt,
    _ => Utc::now(),
  };

  let days_from_monday = i64::from( now.weekday().num_days_from_monday() );
  let monday = now.date_naive() - Duration::days( days_from_monday );
  let start = Utc
    .from_utc_datetime( &monday.and_hms_opt( 0, 0, 0 ).unwrap_or_default() );

  let end = start + Duration::days( 7 );

  ( start.timestamp_millis(), end.timestamp_millis() )
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use chrono::Weekday;

  fn ts( y: i32, m: u32, d: u32, h: u32, min: u32, s: u32 ) -> i64
  {
    Utc.with_ymd_and_hms( y, m, d, h, min, s ).single().expect( "valid ts" ).timestamp_millis()
  }

  #[ test ]
  fn test_calendar_month_snaps_to_utc_month_bounds()
  {
    let ( start, end ) = window_for( RefreshSchedule::CalendarMonth, ts( 2026, 7, 15, 13, 45, 0 ) );
    assert_eq!( start, ts( 2026, 7, 1, 0, 0, 0 ) );
    assert_eq!( end, ts( 2026, 8, 1, 0, 0, 0 ) );
  }

  #[ test ]
  fn test_calendar_month_wraps_december()
  {
    let ( start, end ) = window_for( RefreshSchedule::CalendarMonth, ts( 2026, 12, 31, 23, 59, 59 ) );
    assert_eq!( start, ts( 2026, 12, 1, 0, 0, 0 ) );
    assert_eq!( end, ts( 2027, 1, 1, 0, 0, 0 ) );
  }

  #[ test ]
  fn test_month_end_rollover_boundary()
  {
    // One second before month end is still the old window
    let before = ts( 2026, 6, 30, 23, 59, 59 );
    let ( _, end ) = window_for( RefreshSchedule::CalendarMonth, before );
    assert!( before < end );

    // One second after midnight falls in the fresh window
    let after = ts( 2026, 7, 1, 0, 0, 1 );
    let ( start, _ ) = window_for( RefreshSchedule::CalendarMonth, after );
    assert_eq!( start, ts( 2026, 7, 1, 0, 0, 0 ) );
    assert!( after >= start );
    assert!( after < end || start == end );
  }

  #[ test ]
  fn test_weekly_starts_iso_monday()
  {
    // 2026-07-15 is a Wednesday
    let ( start, end ) = window_for( RefreshSchedule::Weekly, ts( 2026, 7, 15, 10, 0, 0 ) );
    assert_eq!( start, ts( 2026, 7, 13, 0, 0, 0 ) );
    assert_eq!( end, ts( 2026, 7, 20, 0, 0, 0 ) );

    let monday = match Utc.timestamp_millis_opt( start )
    {
      chrono::LocalResult::Single( dt ) => dt,
      _ => unreachable!(),
    };
    assert_eq!( monday.weekday(), Weekday::Mon );
  }

  #[ test ]
  fn test_rolling_window_trails_now()
  {
    let now = ts( 2026, 7, 15, 10, 0, 0 );
    let ( start, end ) = window_for( RefreshSchedule::Rolling7d, now );
    assert_eq!( start, now - 7 * 24 * 3600 * 1000 );
    assert!( end > now );
    assert!( is_rolling( RefreshSchedule::Rolling7d ) );
    assert!( !is_rolling( RefreshSchedule::CalendarMonth ) );
  }
}
