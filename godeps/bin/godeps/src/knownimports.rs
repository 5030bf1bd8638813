// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Go standard-library import set.
//!
//! Imports found here never map to a third-party module and are pruned from
//! the package graph.

use std::collections::HashSet;

use once_cell::sync::Lazy;

static KNOWN_IMPORTS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "archive/tar",
        "archive/zip",
        "bufio",
        "bytes",
        "compress/bzip2",
        "compress/flate",
        "compress/gzip",
        "compress/lzw",
        "compress/zlib",
        "container/heap",
        "container/list",
        "container/ring",
        "context",
        "crypto",
        "crypto/aes",
        "crypto/cipher",
        "crypto/des",
        "crypto/dsa",
        "crypto/ecdsa",
        "crypto/ed25519",
        "crypto/elliptic",
        "crypto/hmac",
        "crypto/md5",
        "crypto/rand",
        "crypto/rc4",
        "crypto/rsa",
        "crypto/sha1",
        "crypto/sha256",
        "crypto/sha512",
        "crypto/subtle",
        "crypto/tls",
        "crypto/x509",
        "crypto/x509/pkix",
        "database/sql",
        "database/sql/driver",
        "debug/dwarf",
        "debug/elf",
        "debug/gosym",
        "debug/macho",
        "debug/pe",
        "debug/plan9obj",
        "embed",
        "encoding",
        "encoding/ascii85",
        "encoding/asn1",
        "encoding/base32",
        "encoding/base64",
        "encoding/binary",
        "encoding/csv",
        "encoding/gob",
        "encoding/hex",
        "encoding/json",
        "encoding/pem",
        "encoding/xml",
        "errors",
        "expvar",
        "flag",
        "fmt",
        "go/ast",
        "go/build",
        "go/build/constraint",
        "go/constant",
        "go/doc",
        "go/format",
        "go/importer",
        "go/parser",
        "go/printer",
        "go/scanner",
        "go/token",
        "go/types",
        "hash",
        "hash/adler32",
        "hash/crc32",
        "hash/crc64",
        "hash/fnv",
        "hash/maphash",
        "html",
        "html/template",
        "image",
        "image/color",
        "image/color/palette",
        "image/draw",
        "image/gif",
        "image/jpeg",
        "image/png",
        "index/suffixarray",
        "io",
        "io/fs",
        "io/ioutil",
        "log",
        "log/syslog",
        "math",
        "math/big",
        "math/bits",
        "math/cmplx",
        "math/rand",
        "mime",
        "mime/multipart",
        "mime/quotedprintable",
        "net",
        "net/http",
        "net/http/cgi",
        "net/http/cookiejar",
        "net/http/fcgi",
        "net/http/httptest",
        "net/http/httptrace",
        "net/http/httputil",
        "net/http/pprof",
        "net/mail",
        "net/netip",
        "net/rpc",
        "net/rpc/jsonrpc",
        "net/smtp",
        "net/textproto",
        "net/url",
        "os",
        "os/exec",
        "os/signal",
        "os/user",
        "path",
        "path/filepath",
        "plugin",
        "reflect",
        "regexp",
        "regexp/syntax",
        "runtime",
        "runtime/cgo",
        "runtime/debug",
        "runtime/metrics",
        "runtime/pprof",
        "runtime/race",
        "runtime/trace",
        "sort",
        "strconv",
        "strings",
        "sync",
        "sync/atomic",
        "syscall",
        "testing",
        "testing/fstest",
        "testing/iotest",
        "testing/quick",
        "text/scanner",
        "text/tabwriter",
        "text/template",
        "text/template/parse",
        "time",
        "time/tzdata",
        "unicode",
        "unicode/utf16",
        "unicode/utf8",
        "unsafe",
    ]
    .into_iter()
    .collect()
});

/// Reports whether `import_path` names a standard-library package.
pub fn is_known(import_path: &str) -> bool {
    KNOWN_IMPORTS.contains(import_path)
}
