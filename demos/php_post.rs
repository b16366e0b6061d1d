//! POST a form to a local PHP-FPM pool and print what comes back.
//!
//! Expects PHP-FPM listening on /tmp/php-cgi.sock and a script at /www/index.php.

extern crate env_logger;
extern crate fastcgi_client;
#[macro_use] extern crate log;

use fastcgi_client::*;

use std::io::Read;
use std::os::unix::net::UnixStream;
use std::process;
use std::time::Duration;

const SOCKET: &str = "/tmp/php-cgi.sock";
const SCRIPT: &str = "/www/index.php";

fn main() {
    env_logger::init();

    let mut conn = match UnixStream::connect(SOCKET) {
        Ok(conn) => conn,
        Err(e) => {
            error!("connecting to {}: {}", SOCKET, e);
            process::exit(1);
        }
    };

    let mut req = Request::new();
    req.set_timeout(Duration::from_secs(5));
    req.set_param("SCRIPT_FILENAME", SCRIPT);
    req.set_param("SERVER_SOFTWARE", "fastcgi-client/0.1.0");
    req.set_param("REMOTE_ADDR", "127.0.0.1");
    req.set_param("QUERY_STRING", "NAME=VALUE");
    req.set_param("SERVER_NAME", "example.com");
    req.set_param("SERVER_PORT", "80");
    req.set_param("REQUEST_URI", "/index.php");
    req.set_param("DOCUMENT_ROOT", "/www");
    req.set_param("GATEWAY_INTERFACE", "CGI/1.1");
    req.set_param("REDIRECT_STATUS", "200");
    req.set_param("HTTP_HOST", "example.com");
    req.set_form(&[("name", "lu"), ("age", "20")]);

    match req.call_on(&mut conn) {
        Ok((response, stderr)) => {
            println!("{}", response.status_line());
            for (name, value) in response.headers() {
                println!("{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
            }
            println!();
            let mut body = String::new();
            if let Err(e) = response.body_reader().read_to_string(&mut body) {
                error!("body is not UTF-8: {}", e);
            }
            println!("{}", body);
            if !stderr.is_empty() {
                eprintln!("stderr: {}", String::from_utf8_lossy(&stderr));
            }
        }
        Err(e) => {
            error!("call failed: {}", e);
            process::exit(1);
        }
    }
}
