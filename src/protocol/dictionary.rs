//! Preset zlib dictionaries for SPDY header blocks

use super::Version;
use std::sync::OnceLock;

/// SPDY/2 dictionary, a flat string followed by a NUL byte
const SPDY2_DICTIONARY: &[u8] = b"optionsgetheadpostputdeletetraceacceptaccept-charsetaccept-encodingaccept-\
languageauthorizationexpectfromhostif-modified-sinceif-matchif-none-matchi\
f-rangeif-unmodifiedsincemax-forwardsproxy-authorizationrangerefererteuser\
-agent10010120020120220320420520630030130230330430530630740040140240340440\
5406407408409410411412413414415416417500501502503504505accept-rangesageeta\
glocationproxy-authenticatepublicretry-afterservervarywarningwww-authentic\
ateallowcontent-basecontent-encodingcache-controlconnectiondatetrailertran\
sfer-encodingupgradeviawarningcontent-languagecontent-lengthcontent-locati\
oncontent-md5content-rangecontent-typeetagexpireslast-modifiedset-cookieMo\
ndayTuesdayWednesdayThursdayFridaySaturdaySundayJanFebMarAprMayJunJulAugSe\
pOctNovDecchunkedtext/htmlimage/pngimage/jpgimage/gifapplication/xmlapplic\
ation/xhtmltext/plainpublicmax-agecharset=iso-8859-1utf-8gzipdeflateHTTP/1\
.1statusversionurl\0";

/// SPDY/3 dictionary words, each stored with a 4-byte big-endian length
const SPDY3_WORDS: [&str; 65] = [
    "options",
    "head",
    "post",
    "put",
    "delete",
    "trace",
    "accept",
    "accept-charset",
    "accept-encoding",
    "accept-language",
    "accept-ranges",
    "age",
    "allow",
    "authorization",
    "cache-control",
    "connection",
    "content-base",
    "content-encoding",
    "content-language",
    "content-length",
    "content-location",
    "content-md5",
    "content-range",
    "content-type",
    "date",
    "etag",
    "expect",
    "expires",
    "from",
    "host",
    "if-match",
    "if-modified-since",
    "if-none-match",
    "if-range",
    "if-unmodified-since",
    "last-modified",
    "location",
    "max-forwards",
    "pragma",
    "proxy-authenticate",
    "proxy-authorization",
    "range",
    "referer",
    "retry-after",
    "server",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "user-agent",
    "vary",
    "via",
    "warning",
    "www-authenticate",
    "method",
    "get",
    "status",
    "200 OK",
    "version",
    "HTTP/1.1",
    "url",
    "public",
    "set-cookie",
    "keep-alive",
    "origin",
];

/// Raw tail appended after the length-prefixed words
const SPDY3_TAIL: &str = "100101201202205206300302303304305306307402405406407408409410411412413414415416417502504505\
203 Non-Authoritative Information204 No Content301 Moved Permanently400 Bad Request401 Unauthorized\
403 Forbidden404 Not Found500 Internal Server Error501 Not Implemented503 Service Unavailable\
Jan Feb Mar Apr May Jun Jul Aug Sept Oct Nov Dec 00:00:00 Mon, Tue, Wed, Thu, Fri, Sat, Sun, GMT\
chunked,text/html,image/png,image/jpg,image/gif,application/xml,application/xhtml+xml,text/plain,\
text/javascript,publicprivatemax-age=gzip,deflate,sdchcharset=utf-8charset=iso-8859-1,utf-,*,enq=0.";

fn spdy3_dictionary() -> &'static [u8] {
    static DICTIONARY: OnceLock<Vec<u8>> = OnceLock::new();
    DICTIONARY.get_or_init(|| {
        let mut dict = Vec::with_capacity(1500);
        for word in SPDY3_WORDS {
            dict.extend_from_slice(&(word.len() as u32).to_be_bytes());
            dict.extend_from_slice(word.as_bytes());
        }
        dict.extend_from_slice(SPDY3_TAIL.as_bytes());
        dict
    })
}

/// Dictionary for a SPDY version, `None` for HTTP/2
pub fn for_version(version: Version) -> Option<&'static [u8]> {
    match version {
        Version::Spdy2 => Some(SPDY2_DICTIONARY),
        Version::Spdy3 | Version::Spdy31 => Some(spdy3_dictionary()),
        Version::Http2 => None,
    }
}
