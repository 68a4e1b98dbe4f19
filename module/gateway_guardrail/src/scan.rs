//! Case-insensitive keyword scanning

/// Return each configured keyword found in `text`, case-insensitively
///
/// Scanning is pure, so running the same stage twice over the same input
/// always yields the same violations.
#[ must_use ]
pub fn scan_keywords( text: &str, keywords: &[ String ] ) -> Vec< String >
{
  if text.is_empty() || keywords.is_empty()
  {
    return Vec::new();
  }

  let haystack = text.to_lowercase();

  keywords
    .iter()
    .filter( |keyword| !keyword.is_empty() )
    .filter( |keyword| haystack.contains( &keyword.to_lowercase() ) )
    .cloned()
    .collect()
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  fn keywords( list: &[ &str ] ) -> Vec< String >
  {
    list.iter().map( |s| ( *s ).to_string() ).collect()
  }

  #[ test ]
  fn test_match_is_case_insensitive()
  {
    let hits = scan_keywords( "Tell me about FORBIDDEN topics", &keywords( &[ "forbidden" ] ) );
    assert_eq!( hits, vec![ "forbidden".to_string() ] );
  }

  #[ test ]
  fn test_substring_matching()
  {
    let hits = scan_keywords( "self-destruction manual", &keywords( &[ "destruct" ] ) );
    assert_eq!( hits.len(), 1 );
  }

  #[ test ]
  fn test_no_hits_for_clean_text()
  {
    let hits = scan_keywords( "a perfectly fine request", &keywords( &[ "forbidden", "blocked" ] ) );
    assert!( hits.is_empty() );
  }

  #[ test ]
  fn test_scan_is_idempotent()
  {
    let text = "some Forbidden and blocked content";
    let list = keywords( &[ "forbidden", "blocked", "absent" ] );

    let first = scan_keywords( text, &list );
    let second = scan_keywords( text, &list );
    assert_eq!( first, second );
    assert_eq!( first.len(), 2 );
  }
}
