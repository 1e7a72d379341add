pub fn is_authenticated_url(url: &url::Url) -> bool {
    ["git+ssh", "bzr+ssh"].contains(&url.scheme())
}
